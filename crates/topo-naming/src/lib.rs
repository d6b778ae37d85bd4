pub mod element_map;
pub mod export;
pub mod hasher;
pub mod shape;

pub use element_map::{ElementMap, MapEntry, NameOrigin};
pub use export::{export_element_name, MAX_LOWER_TOPO_NAMES, MIN_LOWER_TOPO_NAMES};
pub use hasher::{HasherRef, StringHasher};
pub use shape::{ElementHop, FixMode, SearchOptions, Shape};
