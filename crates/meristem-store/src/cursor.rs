use base64::Engine as _;
use meristem_domain::TaskId;

use crate::error::StoreError;

/// Opaque pagination cursor encoding the sort key `(created_at, task_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCursor {
    pub created_at: i64,
    pub task_id: TaskId,
}

impl TaskCursor {
    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.created_at, self.task_id);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(s: &str) -> Result<TaskCursor, StoreError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| StoreError::InvalidCursor)?;
        let raw = String::from_utf8(bytes).map_err(|_| StoreError::InvalidCursor)?;
        let (ts, id) = raw.split_once(':').ok_or(StoreError::InvalidCursor)?;
        let created_at: i64 = ts.parse().map_err(|_| StoreError::InvalidCursor)?;
        if id.is_empty() {
            return Err(StoreError::InvalidCursor);
        }
        Ok(TaskCursor { created_at, task_id: TaskId::new(id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cursor = TaskCursor { created_at: 1_700_000_000_123, task_id: TaskId::new("t-42") };
        let decoded = TaskCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(TaskCursor::decode("!!!"), Err(StoreError::InvalidCursor)));
        assert!(matches!(TaskCursor::decode(""), Err(StoreError::InvalidCursor)));
        let no_sep = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("12345");
        assert!(matches!(TaskCursor::decode(&no_sep), Err(StoreError::InvalidCursor)));
        let bad_ts = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("abc:t1");
        assert!(matches!(TaskCursor::decode(&bad_ts), Err(StoreError::InvalidCursor)));
    }
}
