mod backup;
mod cleanup;
mod list;
mod run;
mod schedule;
mod verify;

// Backup commands
pub use backup::{run_database_backup, run_file_backup, run_restore, run_server_backup};

// Retention commands
pub use cleanup::run_cleanup;

// Verification commands
pub use verify::run_verify;

// Scheduler commands
pub use run::run_scheduler_tick;
pub use schedule::handle_schedule_command;

// Listing commands
pub use list::run_list_backups;
