use std::fmt;

/// Term is the raft leadership epoch. It only ever moves forward on a given replica.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Term(u64);

impl Term {
    pub const fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Term {
        Term(self.0 + 1)
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OpId identifies a raft log entry. Index 0 never holds an entry; `OpId::MIN` is the sentinel
/// used before anything has been received or committed.
///
/// Ordering is by term first, then index, which matches raft's "more up-to-date" comparison.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct OpId {
    pub term: Term,
    pub index: u64,
}

impl OpId {
    pub const MIN: OpId = OpId {
        term: Term::new(0),
        index: 0,
    };

    pub const fn new(term: u64, index: u64) -> Self {
        OpId {
            term: Term::new(term),
            index,
        }
    }

    pub fn is_min(&self) -> bool {
        *self == Self::MIN
    }

    /// Checks that `current` may directly follow `previous` in the log: the term must not go
    /// backwards and the index must be exactly one past the previous index.
    pub fn check_in_sequence(previous: OpId, current: OpId) -> Result<(), String> {
        if current.term < previous.term {
            return Err(format!(
                "New operation's term is not >= than the previous op's term. Current: {}. Previous: {}",
                current, previous
            ));
        }
        if current.index != previous.index + 1 {
            return Err(format!(
                "New operation's index does not follow the previous op's index. Current: {}. Previous: {}",
                current, previous
            ));
        }

        Ok(())
    }
}

impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.term.0, self.index)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.term.0, self.index)
    }
}
