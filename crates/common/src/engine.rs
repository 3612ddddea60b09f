//! Transfer engine abstraction
//!
//! The driver does not own a USB stack. It is written against this trait,
//! which covers the primitives it needs from one: synchronous control round
//! trips, descriptor fetches, and an asynchronous bulk OUT pipe that is
//! observed through a busy predicate while a task pump advances it.
//!
//! Implementations: the rusb-backed host in the `driver` crate, and
//! [`crate::test_utils::MockEngine`] for tests.

use protocol::{BulkEndpoint, BusAddress, DeviceSummary, SetupPacket, UsbError};
use std::time::Duration;

pub type EngineResult<T> = std::result::Result<T, UsbError>;

/// USB host transfer primitives consumed by the driver
///
/// All calls are made from a single logical task. Control transfers complete
/// before returning. Bulk transfers are submitted, then observed with
/// [`endpoint_busy`](Self::endpoint_busy) while the caller invokes
/// [`pump`](Self::pump) so completions can be drained.
pub trait TransferEngine {
    /// Devices currently attached to the bus
    fn list_devices(&mut self) -> EngineResult<Vec<DeviceSummary>>;

    /// Vendor and product id of the device at `address`
    fn vendor_product(&mut self, address: BusAddress) -> EngineResult<(u16, u16)>;

    /// Control transfer with a device-to-host data stage
    ///
    /// Fills `buf` (at most `setup.length` bytes) and returns the number of
    /// bytes received.
    fn control_in(
        &mut self,
        address: BusAddress,
        setup: SetupPacket,
        buf: &mut [u8],
        timeout: Duration,
    ) -> EngineResult<usize>;

    /// Control transfer with a host-to-device data stage
    fn control_out(
        &mut self,
        address: BusAddress,
        setup: SetupPacket,
        data: &[u8],
        timeout: Duration,
    ) -> EngineResult<()>;

    /// Raw serial number string descriptor in language `lang_id`
    fn serial_string_descriptor(
        &mut self,
        address: BusAddress,
        lang_id: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> EngineResult<usize>;

    /// Raw configuration descriptor (index 0)
    fn config_descriptor(
        &mut self,
        address: BusAddress,
        buf: &mut [u8],
        timeout: Duration,
    ) -> EngineResult<usize>;

    /// Prepare the bulk endpoint for transfers (claims its interface)
    fn open_endpoint(&mut self, address: BusAddress, endpoint: BulkEndpoint) -> EngineResult<()>;

    /// Queue one bulk OUT transfer; completion is observed via
    /// [`endpoint_busy`](Self::endpoint_busy)
    fn submit_bulk(
        &mut self,
        address: BusAddress,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> EngineResult<()>;

    /// Whether the last bulk transfer on the endpoint is still in flight
    ///
    /// `Ok(false)` once it completed successfully, `Err` if it completed with
    /// an error. The error is reported once.
    fn endpoint_busy(&mut self, address: BusAddress, endpoint: u8) -> EngineResult<bool>;

    /// Give the engine a chance to advance in-flight transfers
    fn pump(&mut self);

    /// Release an endpoint opened with [`open_endpoint`](Self::open_endpoint)
    fn release_endpoint(&mut self, address: BusAddress, endpoint: BulkEndpoint);
}
