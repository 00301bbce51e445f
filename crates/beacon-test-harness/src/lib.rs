//! beacon-test-harness: mock transports, a simulated controller, and a
//! virtual wall clock for testing the beacon without hardware.

pub mod clock;
pub mod mock_serial;
pub mod sim;

pub use clock::PausedClock;
pub use mock_serial::{MockHandle, MockTransport, Reply};
pub use sim::SimulatedQitx;
