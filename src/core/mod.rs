pub mod benchfn;
pub mod config_manager;
pub mod gp_bandit;
pub mod graybox;
pub mod optimizer;
pub mod outputs;
pub mod random;
pub mod random_search;
pub mod space;
pub mod surrogate;
pub mod trial;
pub mod tuner;
