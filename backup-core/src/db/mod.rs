// DuckDB数据库模块
//
// 通过Actor模式满足DuckDB的单线程访问要求：所有读写都经由同一个
// Actor 串行执行，同一条备份记录不会被两个任务同时更新。
//
// 主要组件：
// - DuckDbManager: 高级API接口，供 Database 适配器使用
// - DuckDbActor: 内部Actor，处理实际的数据库操作
// - 行模型和消息定义

mod actor;
mod manager;
mod messages;
mod models;

// 公开核心接口
pub use manager::DuckDbManager;
pub use models::{DatabaseBackupRow, FileBackupRow, RecordQuery, ScheduleRow, ServerBackupRow};
