pub type Map<K, V> = hashbrown::HashMap<K, V>;
pub type Set<T> = hashbrown::HashSet<T>;

pub use wrapped::WrappedRcRefCell;

mod wrapped;

/// Identifiers are opaque strings supplied on the wire (client-minted job ids,
/// worker-chosen worker ids) or minted by the foreman.
pub type JobId = String;
pub type TaskId = String;
pub type WorkerId = String;
