pub mod contract;
pub mod draw;
pub mod pool;
pub mod recommendation;
