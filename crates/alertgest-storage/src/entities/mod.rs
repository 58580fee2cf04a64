pub mod alert;
pub mod capture_window;
pub mod digest;
