pub(crate) mod af;
pub mod errors;
pub(crate) mod prefix_id;

pub use af::AddressFamily;
pub use prefix_id::PrefixId;

/// The metadata stored with each prefix.
///
/// There are no requirements beyond being shareable between threads and
/// printable for diagnostics; anything a routing daemon hangs off a prefix
/// (a route, a set of paths, an aggregate) qualifies. Metadata is written
/// once, before the entry becomes visible; mutation afterwards is the
/// caller's business via interior mutability.
pub trait Meta: std::fmt::Debug + Send + Sync + 'static {}

impl<T: std::fmt::Debug + Send + Sync + 'static> Meta for T {}
