//! Fixed-length occupancy bitmap.

/// One bit per block/line; set means occupied.
#[derive(Debug, Clone)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; (len + 63) / 64],
            len,
            ones: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.ones
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Set a bit. Returns false if it was already set.
    pub fn set(&mut self, index: usize) -> bool {
        if self.get(index) {
            return false;
        }
        self.words[index / 64] |= 1 << (index % 64);
        self.ones += 1;
        true
    }

    /// Clear a bit. Returns false if it was already clear.
    pub fn clear(&mut self, index: usize) -> bool {
        if !self.get(index) {
            return false;
        }
        self.words[index / 64] &= !(1 << (index % 64));
        self.ones -= 1;
        true
    }

    pub fn set_range(&mut self, start: usize, count: usize) {
        for i in start..start + count {
            self.set(i);
        }
    }

    pub fn clear_range(&mut self, start: usize, count: usize) {
        for i in start..start + count {
            self.clear(i);
        }
    }

    /// First run of `count` clear bits whose start is a multiple of `step`.
    pub fn find_clear_run(&self, count: usize, step: usize) -> Option<usize> {
        if count == 0 || count > self.len {
            return None;
        }
        let step = step.max(1);
        let mut start = 0;
        'outer: while start + count <= self.len {
            for i in start..start + count {
                if self.get(i) {
                    // Skip past the blocker, keeping the start on the step grid.
                    start = (i + 1 + step - 1) / step * step;
                    continue 'outer;
                }
            }
            return Some(start);
        }
        None
    }

    /// Length of the longest run of clear bits.
    pub fn longest_clear_run(&self) -> usize {
        let mut best = 0;
        let mut current = 0;
        for i in 0..self.len {
            if self.get(i) {
                current = 0;
            } else {
                current += 1;
                best = best.max(current);
            }
        }
        best
    }

    /// Render as run-length text, e.g. `#x3 .x5`.
    pub fn render_runs(&self) -> String {
        let mut out = String::new();
        let mut i = 0;
        while i < self.len {
            let bit = self.get(i);
            let mut run = 1;
            while i + run < self.len && self.get(i + run) == bit {
                run += 1;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push(if bit { '#' } else { '.' });
            out.push_str(&format!("x{}", run));
            i += run;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_counts() {
        let mut bits = Bitmap::new(130);
        assert!(bits.set(0));
        assert!(bits.set(129));
        assert!(!bits.set(129));
        assert_eq!(bits.count_ones(), 2);
        assert!(bits.clear(0));
        assert!(!bits.clear(0));
        assert_eq!(bits.count_ones(), 1);
    }

    #[test]
    fn test_find_clear_run_respects_step() {
        let mut bits = Bitmap::new(16);
        bits.set(1);
        assert_eq!(bits.find_clear_run(2, 1), Some(2));
        assert_eq!(bits.find_clear_run(2, 4), Some(4));
        bits.set_range(4, 12);
        assert_eq!(bits.find_clear_run(3, 1), None);
        assert_eq!(bits.longest_clear_run(), 2);
    }

    #[test]
    fn test_render_runs() {
        let mut bits = Bitmap::new(6);
        bits.set_range(0, 2);
        assert_eq!(bits.render_runs(), "#x2 .x4");
    }
}
