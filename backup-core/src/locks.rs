use crate::models::RecordKind;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 按备份记录加锁
///
/// 同一条记录的删除与校验互斥，不同记录之间互不影响。
#[derive(Clone, Debug, Default)]
pub struct RecordLocks {
    locks: Arc<DashMap<(RecordKind, i64), Arc<Mutex<()>>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取记录锁，持有期间其他任务对同一记录的 acquire 会等待
    pub async fn acquire(&self, kind: RecordKind, id: i64) -> OwnedMutexGuard<()> {
        self.get_or_create(kind, id).lock_owned().await
    }

    fn get_or_create(&self, kind: RecordKind, id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry((kind, id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 记录删除后释放对应的锁条目
    pub fn forget(&self, kind: RecordKind, id: i64) {
        self.locks
            .remove_if(&(kind, id), |_, lock| Arc::strong_count(lock) == 1);
    }
}
