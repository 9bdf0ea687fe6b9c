/// Clamp a value to optional lower and upper bounds,
/// e.g. a feature coordinate into the unit range.
pub fn clip<T: PartialOrd>(value: T, min: Option<T>, max: Option<T>) -> T {
    if let Some(min) = min {
        if value < min {
            return min;
        }
    }

    if let Some(max) = max {
        if max < value {
            return max;
        }
    }

    value
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clips_to_the_given_bounds() {
        assert_eq!(clip(0.5, Some(0.0), Some(1.0)), 0.5);
        assert_eq!(clip(-2.0, Some(0.0), Some(1.0)), 0.0);
        assert_eq!(clip(7, None, Some(3)), 3);
        assert_eq!(clip(7, Some(2), None), 7);
    }
}
