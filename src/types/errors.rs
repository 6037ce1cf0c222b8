use std::fmt;

/// Possible errors returned by methods on a [Fib](crate::Fib). All of
/// these are recoverable for the caller, although the two consistency
/// variants mean the table itself should no longer be trusted.
#[derive(Debug, PartialEq, Eq)]
pub enum FibError {
    /// The prefix belongs to a different address family than the table.
    AddressFamilyMismatch,
    /// The requested prefix length cannot exist in the table's address
    /// family.
    PrefixLengthInvalid,
    /// Two adjacent list nodes violate the split ordering, or a payload
    /// node precedes a bucket anchor with the same key. The table should
    /// be considered corrupt.
    OrderViolation,
    /// The entry counter disagrees with the number of live nodes reachable
    /// in the list. Only meaningful when the check ran on a quiescent
    /// table; under concurrent mutation a transient mismatch is expected.
    EntryCountMismatch,
}

impl std::error::Error for FibError {}

impl fmt::Display for FibError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FibError::AddressFamilyMismatch => {
                write!(
                    f,
                    "Error: The prefix has a different address family \
                    than the table."
                )
            }
            FibError::PrefixLengthInvalid => {
                write!(f, "Error: The specified prefix length is invalid.")
            }
            FibError::OrderViolation => {
                write!(
                    f,
                    "Error: The list is not in split order. The table is \
                    corrupt."
                )
            }
            FibError::EntryCountMismatch => {
                write!(
                    f,
                    "Error: The entry counter does not match the number \
                    of live entries in the list."
                )
            }
        }
    }
}

/// An unrecoverable error: a structural invariant of the list did not
/// hold, which points at memory corruption or misuse of an entry from
/// another table. All data in the table should be considered corrupt and
/// the application receiving this error should probably terminate.
#[derive(Debug, Copy, Clone)]
pub struct FatalError;

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error: A fatal error has occurred. The table must be \
            considered corrupted. The application should terminate."
        )
    }
}

impl std::error::Error for FatalError {}

pub type FatalResult<T> = Result<T, FatalError>;
