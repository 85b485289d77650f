//! Key-ordered row streams feeding the merge-join.

use bsj_common::{BsjError, JoinSide, Result};
use bsj_shuffle::SpillRow;
use bsj_storage::Value;

/// Wraps a key-sorted row iterator and enforces the ordering contract.
///
/// Every yielded key must compare `>=` its predecessor; otherwise the stream
/// yields [`BsjError::OutOfOrderKey`] naming the side and both keys, then
/// fuses. It also tracks how many consecutive rows share the current key.
pub struct OrderedStream<I> {
    side: JoinSide,
    inner: I,
    previous: Option<Value>,
    run_len: usize,
    rows: u64,
    done: bool,
}

impl<I> OrderedStream<I>
where
    I: Iterator<Item = Result<SpillRow>>,
{
    /// Ordered stream for `side` over `inner`.
    pub fn new(side: JoinSide, inner: I) -> Self {
        Self {
            side,
            inner,
            previous: None,
            run_len: 0,
            rows: 0,
            done: false,
        }
    }

    /// Which join input this stream carries.
    pub fn side(&self) -> JoinSide {
        self.side
    }

    /// Number of consecutive rows, including the last one yielded, that
    /// share the last yielded key.
    pub fn run_len(&self) -> usize {
        self.run_len
    }

    /// Rows yielded so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl<I> Iterator for OrderedStream<I>
where
    I: Iterator<Item = Result<SpillRow>>,
{
    type Item = Result<SpillRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let row = match self.inner.next() {
            Some(Ok(row)) => row,
            Some(Err(e)) => {
                self.done = true;
                return Some(Err(e));
            }
            None => {
                self.done = true;
                return None;
            }
        };
        match &self.previous {
            Some(previous) if row.key < *previous => {
                self.done = true;
                return Some(Err(BsjError::OutOfOrderKey {
                    side: self.side.to_string(),
                    previous: previous.to_string(),
                    current: row.key.to_string(),
                }));
            }
            Some(previous) if row.key == *previous => self.run_len += 1,
            _ => {
                self.run_len = 1;
                self.previous = Some(row.key.clone());
            }
        }
        self.rows += 1;
        Some(Ok(row))
    }
}
