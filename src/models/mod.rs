pub mod candle;
pub mod interval;
pub mod position;
pub mod side;

pub use candle::{Candle, CandleSeries};
pub use interval::Interval;
pub use position::{ClosedTrade, Position};
pub use side::*;
