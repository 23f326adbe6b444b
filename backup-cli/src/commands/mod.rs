mod backup;
mod restore;

use std::time::Duration;

/// 等待后台任务结束时的轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(500);

// Backup commands
pub use backup::{
    run_backup, run_delete_backup, run_download, run_list_backups, run_recover_stale,
    run_show_backup, run_upload,
};

// Restore commands
pub use restore::{run_delete_restore, run_list_restores, run_restore};
