use std::sync::{Mutex, MutexGuard, PoisonError};

/// 获取互斥锁；持锁方 panic 导致的中毒状态被忽略，数据结构本身保持一致
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
