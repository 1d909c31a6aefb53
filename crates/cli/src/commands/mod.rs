pub mod config_cmd;
pub mod doctor;
pub mod onboard;
pub mod research;
pub mod search_check;
