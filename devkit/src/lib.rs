/*!
# Plugin DevKit - test doubles for graphite collector plugins

Lets the plugins be tested without a XenServer pool or a carbon relay:
- Builders for `rrd_updates` XML and XenAPI XML-RPC responses
- A fake XenAPI HTTP endpoint that records every query it receives
- A carbon capture listener that records every line it receives
*/

pub mod carbon_stub;
pub mod fake_xapi;
pub mod fixtures;

pub use carbon_stub::CarbonCapture;
pub use fake_xapi::{FakeVm, FakeXapi};
pub use fixtures::{RrdXmlBuilder, XmlRpcResponse};
