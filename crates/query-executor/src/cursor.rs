//! Row-at-a-time access to query results

use query_core::ResultObject;

/// Iterates over the mapped results of one query, shaped by the statement's
/// result mapper exactly as `query` shapes them. Cursor results never enter
/// the first-level cache.
#[derive(Debug)]
pub struct Cursor {
    rows: std::vec::IntoIter<ResultObject>,
    /// Index of the last returned row, `None` before the first.
    current_index: Option<usize>,
    open: bool,
}

impl Cursor {
    pub(crate) fn new(rows: Vec<ResultObject>) -> Self {
        Self {
            rows: rows.into_iter(),
            current_index: None,
            open: true,
        }
    }

    /// False once the cursor has been exhausted or closed
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// True once every row has been returned.
    pub fn is_consumed(&self) -> bool {
        self.rows.len() == 0
    }

    /// Index of the last returned object
    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// Drop the remaining rows.
    pub fn close(&mut self) {
        self.open = false;
        self.rows = Vec::new().into_iter();
    }
}

impl Iterator for Cursor {
    type Item = ResultObject;

    fn next(&mut self) -> Option<ResultObject> {
        if !self.open {
            return None;
        }
        let object = self.rows.next()?;
        self.current_index = Some(self.current_index.map_or(0, |i| i + 1));
        Some(object)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.open {
            self.rows.size_hint()
        } else {
            (0, Some(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_core::{Row, Value};

    fn rows(n: i64) -> Vec<ResultObject> {
        (0..n)
            .map(|i| ResultObject::from_row(&Row::new().with("id", i)))
            .collect()
    }

    #[test]
    fn test_iterates_in_order() {
        let mut cursor = Cursor::new(rows(3));
        assert_eq!(cursor.current_index(), None);

        let first = cursor.next().unwrap();
        assert_eq!(first.value("id"), Value::Int64(0));
        assert_eq!(cursor.current_index(), Some(0));

        let rest: Vec<_> = cursor.by_ref().collect();
        assert_eq!(rest.len(), 2);
        assert_eq!(cursor.current_index(), Some(2));
        assert!(cursor.is_consumed());
    }

    #[test]
    fn test_close_stops_iteration() {
        let mut cursor = Cursor::new(rows(3));
        cursor.next();
        cursor.close();
        assert!(!cursor.is_open());
        assert!(cursor.next().is_none());
    }
}
