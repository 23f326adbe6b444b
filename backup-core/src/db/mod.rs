// 任务库模块
//
// 通过 Actor 模式独占一个 rusqlite 连接，所有任务记录的读写以及
// SQLite 方言下应用表的导出/导入都串行经过这个连接。
//
// 主要组件：
// - TaskDbManager: 异步 API，供上层使用
// - TaskDbActor: 内部 Actor，运行在独立线程上执行实际的数据库操作
// - 数据模型和消息定义

mod actor;
mod manager;
mod messages;
mod models;

pub use manager::TaskDbManager;
pub use models::{BackupTask, RestoreRecord, RestoreTask, StaleTaskReport, TaskStatus};
