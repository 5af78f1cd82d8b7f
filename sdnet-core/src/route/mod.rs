//! Unicast routes: storage, next-hop resolution and programming

pub mod manager;
pub mod prefix_table;
pub mod programmer;
pub mod resolver;
pub mod store;
pub mod types;

pub use manager::RouteManager;
pub use prefix_table::PrefixTable;
pub use programmer::RouteProgrammer;
pub use resolver::RouteResolver;
pub use store::RouteStore;
pub use types::{ResolvedRoute, Route, RouteEvent, RouteSet, RouteSource};
