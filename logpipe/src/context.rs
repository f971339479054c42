//! 상관 컨텍스트
//!
//! 하나의 논리적 작업 흐름에 소속된 이벤트들을 묶는 명시적 컨텍스트 객체입니다.
//! 전역 상태나 스레드 로컬에 의존하지 않고, 작업을 시작하는 코드가 컨텍스트를
//! 생성해 호출 체인을 따라 전달합니다. 비동기 태스크 간 암묵적 누수가 없습니다.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// 상관 컨텍스트
///
/// clone은 내부 값 저장소를 공유하므로 같은 작업 흐름의 여러 단계가
/// 동일 컨텍스트를 들고 다닐 수 있습니다. 이벤트 방출 시점에는 현재 값의
/// 스냅샷이 찍히며, 이후의 put/clear는 이미 방출된 이벤트에 영향을 주지 않습니다.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    /// 상관 ID (UUID v4)
    id: String,
    /// 공유 키-값 저장소
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl CorrelationContext {
    /// 새 상관 컨텍스트 생성 (ID 자동 발급)
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// 지정한 ID로 상관 컨텍스트 생성
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 상관 ID 반환
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 컨텍스트 값 추가
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// 여러 컨텍스트 값 일괄 추가
    pub fn put_all<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut values = self.values.write();
        for (key, value) in entries {
            values.insert(key.into(), value.into());
        }
    }

    /// 컨텍스트 값 조회
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// 작업 흐름 종료 시 컨텍스트 값 비우기
    pub fn clear(&self) {
        self.values.write().clear();
    }

    /// 현재 값의 스냅샷 반환
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().clone()
    }

    /// 저장된 값 개수
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// 값이 비어있는지 확인
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_are_unique() {
        let first = CorrelationContext::new();
        let second = CorrelationContext::new();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_put_and_get() {
        let ctx = CorrelationContext::new();
        ctx.put("user_id", "42");
        assert_eq!(ctx.get("user_id"), Some("42".to_string()));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn test_put_all_merges_entries() {
        let ctx = CorrelationContext::new();
        ctx.put("existing", "kept");

        ctx.put_all([("batch_a", "1"), ("batch_b", "2")]);

        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.get("batch_a"), Some("1".to_string()));
        assert_eq!(ctx.get("existing"), Some("kept".to_string()));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let ctx = CorrelationContext::new();
        ctx.put("step", "one");

        let snapshot = ctx.snapshot();
        ctx.put("step", "two");
        ctx.put("extra", "value");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("step"), Some(&"one".to_string()));
    }

    #[test]
    fn test_clone_shares_values() {
        let ctx = CorrelationContext::new();
        let handle = ctx.clone();

        handle.put("shared", "yes");
        assert_eq!(ctx.get("shared"), Some("yes".to_string()));
        assert_eq!(ctx.id(), handle.id());
    }

    #[test]
    fn test_clear_empties_values() {
        let ctx = CorrelationContext::new();
        ctx.put("a", "1");
        ctx.put("b", "2");
        assert_eq!(ctx.len(), 2);

        ctx.clear();
        assert!(ctx.is_empty());
        assert_eq!(ctx.get("a"), None);
    }

    #[test]
    fn test_separate_contexts_do_not_leak() {
        let first = CorrelationContext::new();
        let second = CorrelationContext::new();

        first.put("key", "first");
        assert_eq!(second.get("key"), None);
    }
}
