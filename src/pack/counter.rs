//! Write-only sink that counts what it is given

use std::io;
use std::marker::PhantomData;

/// Output adapter that discards every value written to it and keeps a count
///
/// Useful for sizing a buffer before the real pass: run the same producer
/// into a `CountingSink` first, then allocate exactly `count()` slots.
///
/// ```
/// use libra_effort::pack::CountingSink;
///
/// let mut sink = CountingSink::new();
/// sink.extend(vec![1, 2, 3]);
/// assert_eq!(sink.count(), 3);
/// ```
#[derive(Debug)]
pub struct CountingSink<T> {
    count: usize,
    _marker: PhantomData<fn(T)>,
}

impl<T> Default for CountingSink<T> {
    fn default() -> Self {
        Self {
            count: 0,
            _marker: PhantomData,
        }
    }
}

impl<T> CountingSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard one value
    pub fn push(&mut self, _value: T) {
        self.count += 1;
    }

    /// Count `n` values without materialising them
    pub fn advance(&mut self, n: usize) {
        self.count += n;
    }

    /// Number of values written so far
    pub fn count(&self) -> usize {
        self.count
    }
}

impl<T> Extend<T> for CountingSink<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

impl io::Write for CountingSink<u8> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.count += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_sink_counts_zero() {
        let sink: CountingSink<String> = CountingSink::new();
        assert_eq!(sink.count(), 0);

        let mut sink: CountingSink<u64> = CountingSink::new();
        sink.extend(Vec::<u64>::new());
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_counts_any_item_type() {
        let mut strings = CountingSink::new();
        strings.extend(["a", "b", "c", "d"]);
        assert_eq!(strings.count(), 4);

        let mut tuples = CountingSink::new();
        tuples.extend((0..17).map(|i| (i, i as f64)));
        assert_eq!(tuples.count(), 17);
    }

    #[test]
    fn test_push_and_extend_accumulate() {
        let mut sink = CountingSink::new();
        sink.push(1);
        sink.extend(vec![2, 3]);
        sink.advance(5);
        assert_eq!(sink.count(), 8);
    }

    #[test]
    fn test_write_counts_bytes() {
        let mut sink = CountingSink::<u8>::new();
        write!(sink, "APP:\t{}", 1234).unwrap();
        assert_eq!(sink.count(), "APP:\t1234".len());
    }
}
