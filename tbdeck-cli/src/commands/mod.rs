mod doctor;
mod instances;
mod watch;

pub use doctor::run_doctor;
pub use instances::{run_list, run_start, run_stop, run_url};
pub use watch::run_watch;
