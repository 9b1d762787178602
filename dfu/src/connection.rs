use std::cmp;
use std::thread;
use std::time::Duration;

use nusb::{
    MaybeFuture,
    transfer::{ControlIn, ControlOut, ControlType, Recipient},
};

use crate::DEFAULT_TIMEOUT;
use crate::error::DfuError;
use crate::status::{DfuState, DfuStatus};

const DFU_CMD_DETACH: u8 = 0;
const DFU_CMD_DOWNLOAD: u8 = 1;
const DFU_CMD_UPLOAD: u8 = 2;
const DFU_CMD_GETSTATUS: u8 = 3;
const DFU_CMD_CLRSTATUS: u8 = 4;
// const DFU_CMD_GETSTATE: u8 = 5;
const DFU_CMD_ABORT: u8 = 6;

/// Class-type, interface-recipient control transfers against a claimed DFU
/// interface. The engine is generic over this so the protocol sequencing can
/// be driven against a scripted transport in tests.
pub trait DfuTransport {
    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError>;

    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError>;
}

/// [`DfuTransport`] over a claimed [`nusb::Interface`].
///
/// Owning the interface ties the USB claim to the connection lifetime: it is
/// released when the transport is dropped, whichever way the session ends.
pub struct UsbTransport {
    interface: nusb::Interface,
}

impl UsbTransport {
    pub(crate) fn new(interface: nusb::Interface) -> Self {
        UsbTransport { interface }
    }
}

impl DfuTransport for UsbTransport {
    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        let index = self.interface.interface_number() as u16;
        Ok(self
            .interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    data,
                },
                DEFAULT_TIMEOUT,
            )
            .wait()?)
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let index = self.interface.interface_number() as u16;
        Ok(self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    length,
                },
                DEFAULT_TIMEOUT,
            )
            .wait()?)
    }
}

/// A claimed DFU interface ready for protocol requests.
pub struct DfuConnection<T: DfuTransport> {
    transport: T,
    xfer_size: u16,
}

impl<T: DfuTransport> DfuConnection<T> {
    pub(crate) fn new(transport: T, xfer_size: u16) -> Self {
        DfuConnection {
            transport,
            xfer_size: if xfer_size > 0 {
                xfer_size
            } else {
                crate::DEFAULT_TRANSFER_SIZE
            },
        }
    }

    pub fn transfer_size(&self) -> u16 {
        self.xfer_size
    }

    pub fn get_status(&self) -> Result<DfuStatus, DfuError> {
        let data = self.transport.control_in(
            DFU_CMD_GETSTATUS,
            0,
            DfuStatus::LEN,
        )?;
        DfuStatus::from_raw(&data)
    }

    /// CLRSTATUS, mandatory before anything else after the device has
    /// reported an error.
    pub fn clear_status(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_CLRSTATUS, 0, &[])
    }

    /// ABORT, cancels an in-progress download/upload left over from an
    /// earlier session and returns the device to dfuIDLE.
    pub fn abort(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_ABORT, 0, &[])
    }

    /// DETACH, asks a run-time mode device to drop off the bus and
    /// re-enumerate in DFU mode. The caller is responsible for waiting and
    /// re-running discovery afterwards.
    pub fn detach(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_DETACH, 0, &[])
    }

    /// Write a firmware image to the device.
    ///
    /// Splits `data` into transfer-size chunks sent as DNLOAD requests with
    /// strictly increasing transaction numbers, polling after each one, then
    /// signals the end of the image with a zero-length request to trigger
    /// manifestation. `progress` receives (bytes done, bytes total).
    pub fn download(
        &self,
        data: &[u8],
        mut progress: impl FnMut(u64, u64),
    ) -> Result<(), DfuError> {
        self.ensure_idle()?;

        let total = data.len() as u64;
        let mut transaction: u16 = 0;
        let mut sent: u64 = 0;

        for chunk in data.chunks(self.xfer_size as usize) {
            log::debug!(
                "downloading {} bytes (total: {} bytes)",
                chunk.len(),
                sent
            );
            self.download_chunk(transaction, chunk)?;
            transaction += 1;
            sent += chunk.len() as u64;
            progress(sent, total);
        }

        // zero-length request to signal the end of the image
        self.download_chunk(transaction, &[])?;
        progress(total, total);
        Ok(())
    }

    /// Read the firmware image out of the device.
    ///
    /// Issues UPLOAD requests with increasing transaction numbers until the
    /// device answers with less than the requested transfer size; the chunks
    /// concatenated in transaction order are the image. `expected_size` only
    /// bounds progress reporting, the short response is the sole terminator.
    pub fn upload(
        &self,
        expected_size: u64,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<Vec<u8>, DfuError> {
        self.ensure_idle()?;

        let mut data: Vec<u8> = Vec::new();
        let mut transaction: u16 = 0;

        loop {
            let chunk = self.upload_chunk(transaction, self.xfer_size)?;
            let short = (chunk.len() as u16) < self.xfer_size;
            data.extend_from_slice(&chunk);
            transaction += 1;
            progress(cmp::min(data.len() as u64, expected_size), expected_size);
            if short {
                break;
            }
        }

        Ok(data)
    }

    /// Pre-flight checks shared by download and upload: refuse run-time
    /// mode, clear a left-over error, abort a stale transfer.
    fn ensure_idle(&self) -> Result<(), DfuError> {
        let status = self.get_status()?;
        if status.state.is_run_time() {
            return Err(DfuError::NotInDfuMode(status.state));
        }

        let status = self.get_status()?;
        if !status.is_ok() {
            log::info!(
                "clearing previous error ({} in state {})",
                status.status,
                status.state
            );
            self.clear_status()?;
        }

        let status = self.get_status()?;
        if status.state.is_transfer_idle() {
            log::info!("aborting stale transfer (state {})", status.state);
            self.abort()?;
            let status = self.get_status()?;
            if status.state.is_transfer_idle() {
                return Err(DfuError::AbortFailed);
            }
        }
        Ok(())
    }

    fn download_chunk(
        &self,
        transaction: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_DOWNLOAD, transaction, data)?;
        self.poll_transfer(DfuState::DnloadIdle)
    }

    fn upload_chunk(
        &self,
        transaction: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let data =
            self.transport.control_in(DFU_CMD_UPLOAD, transaction, length)?;
        self.poll_transfer(DfuState::UploadIdle)?;
        Ok(data)
    }

    /// Poll GETSTATUS until the device settles in `idle` or dfuIDLE,
    /// sleeping the device-reported interval between polls. A reported
    /// error is cleared once and surfaced; the request is never resent.
    fn poll_transfer(&self, idle: DfuState) -> Result<(), DfuError> {
        loop {
            let status = self.get_status()?;
            if status.state == idle || status.state == DfuState::DfuIdle {
                return Ok(());
            }
            if !status.is_ok() {
                self.clear_status()?;
                return Err(DfuError::Status {
                    status: status.status,
                    state: status.state,
                });
            }
            thread::sleep(Duration::from_millis(status.poll_timeout as u64));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DfuStatusCode;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Request {
        Out { request: u8, value: u16, len: usize },
        In { request: u8, value: u16 },
    }

    /// Transport answering GETSTATUS and UPLOAD from pre-scripted queues
    /// while recording every request in wire order.
    struct ScriptedTransport {
        requests: RefCell<Vec<Request>>,
        statuses: RefCell<VecDeque<Vec<u8>>>,
        uploads: RefCell<VecDeque<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn new(statuses: Vec<Vec<u8>>, uploads: Vec<Vec<u8>>) -> Self {
            ScriptedTransport {
                requests: RefCell::new(Vec::new()),
                statuses: RefCell::new(statuses.into()),
                uploads: RefCell::new(uploads.into()),
            }
        }

        fn requests(&self) -> Vec<Request> {
            self.requests.borrow().clone()
        }
    }

    impl DfuTransport for ScriptedTransport {
        fn control_out(
            &self,
            request: u8,
            value: u16,
            data: &[u8],
        ) -> Result<(), DfuError> {
            self.requests.borrow_mut().push(Request::Out {
                request,
                value,
                len: data.len(),
            });
            Ok(())
        }

        fn control_in(
            &self,
            request: u8,
            value: u16,
            _length: u16,
        ) -> Result<Vec<u8>, DfuError> {
            self.requests.borrow_mut().push(Request::In { request, value });
            match request {
                DFU_CMD_GETSTATUS => Ok(self
                    .statuses
                    .borrow_mut()
                    .pop_front()
                    .expect("GETSTATUS script exhausted")),
                DFU_CMD_UPLOAD => Ok(self
                    .uploads
                    .borrow_mut()
                    .pop_front()
                    .expect("UPLOAD script exhausted")),
                _ => panic!("unexpected IN request {request}"),
            }
        }
    }

    fn status(status: DfuStatusCode, state: DfuState) -> Vec<u8> {
        vec![status as u8, 0, 0, 0, state as u8, 0]
    }

    fn idle() -> Vec<u8> {
        status(DfuStatusCode::Ok, DfuState::DfuIdle)
    }

    fn preflight() -> Vec<Vec<u8>> {
        vec![idle(), idle(), idle()]
    }

    fn downloads(requests: &[Request]) -> Vec<(u16, usize)> {
        requests
            .iter()
            .filter_map(|r| match r {
                Request::Out { request, value, len }
                    if *request == DFU_CMD_DOWNLOAD =>
                {
                    Some((*value, *len))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_download_chunk_sequence() {
        let mut script = preflight();
        // one DNLOAD-IDLE poll per data chunk, one for the final ZLP
        for _ in 0..4 {
            script.push(status(DfuStatusCode::Ok, DfuState::DnloadIdle));
        }
        let conn =
            DfuConnection::new(ScriptedTransport::new(script, vec![]), 4096);

        let image = vec![0xA5u8; 10000];
        let mut reported = vec![];
        conn.download(&image, |done, total| reported.push((done, total)))
            .unwrap();

        assert_eq!(
            downloads(&conn.transport.requests()),
            vec![(0, 4096), (1, 4096), (2, 1808), (3, 0)]
        );
        assert_eq!(reported.last(), Some(&(10000, 10000)));
    }

    #[test]
    fn test_empty_image_sends_only_final_request() {
        let mut script = preflight();
        script.push(idle());
        let conn =
            DfuConnection::new(ScriptedTransport::new(script, vec![]), 2048);

        conn.download(&[], |_, _| {}).unwrap();
        assert_eq!(downloads(&conn.transport.requests()), vec![(0, 0)]);
    }

    #[test]
    fn test_download_polls_through_busy_states() {
        let mut script = preflight();
        script.push(status(DfuStatusCode::Ok, DfuState::DnloadSync));
        script.push(status(DfuStatusCode::Ok, DfuState::DnloadBusy));
        script.push(status(DfuStatusCode::Ok, DfuState::DnloadIdle));
        script.push(idle());
        let conn =
            DfuConnection::new(ScriptedTransport::new(script, vec![]), 64);

        conn.download(&[0u8; 16], |_, _| {}).unwrap();

        // one data chunk, three polls for it, then the final request
        let requests = conn.transport.requests();
        let polls = requests
            .iter()
            .filter(|r| {
                matches!(r, Request::In { request, .. } if *request == DFU_CMD_GETSTATUS)
            })
            .count();
        assert_eq!(polls, 3 + 3 + 1);
        assert_eq!(downloads(&requests), vec![(0, 16), (1, 0)]);
    }

    #[test]
    fn test_download_error_clears_status_and_stops() {
        let mut script = preflight();
        script.push(status(DfuStatusCode::ErrWrite, DfuState::Error));
        let conn =
            DfuConnection::new(ScriptedTransport::new(script, vec![]), 64);

        let err = conn.download(&[0u8; 128], |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            DfuError::Status {
                status: DfuStatusCode::ErrWrite,
                state: DfuState::Error,
            }
        ));

        // after the failing poll: CLRSTATUS, and the chunk is never resent
        let requests = conn.transport.requests();
        assert_eq!(
            requests.last(),
            Some(&Request::Out {
                request: DFU_CMD_CLRSTATUS,
                value: 0,
                len: 0
            })
        );
        assert_eq!(downloads(&requests), vec![(0, 64)]);
    }

    #[test]
    fn test_download_rejects_run_time_mode() {
        let script = vec![status(DfuStatusCode::Ok, DfuState::AppIdle)];
        let conn =
            DfuConnection::new(ScriptedTransport::new(script, vec![]), 64);

        let err = conn.download(&[0u8; 8], |_, _| {}).unwrap_err();
        assert!(matches!(err, DfuError::NotInDfuMode(DfuState::AppIdle)));
        assert!(downloads(&conn.transport.requests()).is_empty());
    }

    #[test]
    fn test_stale_transfer_aborted_before_download() {
        let script = vec![
            idle(),
            idle(),
            status(DfuStatusCode::Ok, DfuState::DnloadIdle),
            idle(), // state after ABORT
            idle(), // poll after the final request
        ];
        let conn =
            DfuConnection::new(ScriptedTransport::new(script, vec![]), 64);

        conn.download(&[], |_, _| {}).unwrap();

        let requests = conn.transport.requests();
        let abort_at = requests
            .iter()
            .position(|r| {
                matches!(r, Request::Out { request, .. } if *request == DFU_CMD_ABORT)
            })
            .expect("no ABORT issued");
        let first_dnload = requests
            .iter()
            .position(|r| {
                matches!(r, Request::Out { request, .. } if *request == DFU_CMD_DOWNLOAD)
            })
            .unwrap();
        assert!(abort_at < first_dnload);
    }

    #[test]
    fn test_abort_failure_is_fatal() {
        let script = vec![
            idle(),
            idle(),
            status(DfuStatusCode::Ok, DfuState::UploadIdle),
            status(DfuStatusCode::Ok, DfuState::UploadIdle),
        ];
        let conn =
            DfuConnection::new(ScriptedTransport::new(script, vec![]), 64);

        let err = conn.download(&[0u8; 8], |_, _| {}).unwrap_err();
        assert!(matches!(err, DfuError::AbortFailed));
        assert!(downloads(&conn.transport.requests()).is_empty());
    }

    #[test]
    fn test_upload_terminates_on_short_response() {
        let mut script = preflight();
        for _ in 0..3 {
            script.push(status(DfuStatusCode::Ok, DfuState::UploadIdle));
        }
        let chunks = vec![vec![1u8; 64], vec![2u8; 64], vec![3u8; 10]];
        let conn =
            DfuConnection::new(ScriptedTransport::new(script, chunks), 64);

        let data = conn.upload(1024, |_, _| {}).unwrap();

        let mut expected = vec![1u8; 64];
        expected.extend_from_slice(&[2u8; 64]);
        expected.extend_from_slice(&[3u8; 10]);
        assert_eq!(data, expected);

        let values: Vec<u16> = conn
            .transport
            .requests()
            .iter()
            .filter_map(|r| match r {
                Request::In { request, value }
                    if *request == DFU_CMD_UPLOAD =>
                {
                    Some(*value)
                }
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn test_upload_accepts_trailing_empty_response() {
        let mut script = preflight();
        for _ in 0..3 {
            script.push(status(DfuStatusCode::Ok, DfuState::UploadIdle));
        }
        let chunks = vec![vec![1u8; 64], vec![2u8; 64], vec![]];
        let conn =
            DfuConnection::new(ScriptedTransport::new(script, chunks), 64);

        let data = conn.upload(0, |_, _| {}).unwrap();
        assert_eq!(data.len(), 128);
    }

    #[test]
    fn test_upload_error_clears_status_and_stops() {
        let mut script = preflight();
        script.push(status(DfuStatusCode::Ok, DfuState::UploadIdle));
        script.push(status(DfuStatusCode::ErrStalledPkt, DfuState::Error));
        let chunks = vec![vec![1u8; 64], vec![2u8; 64]];
        let conn =
            DfuConnection::new(ScriptedTransport::new(script, chunks), 64);

        let err = conn.upload(0, |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            DfuError::Status {
                status: DfuStatusCode::ErrStalledPkt,
                ..
            }
        ));
        assert_eq!(
            conn.transport.requests().last(),
            Some(&Request::Out {
                request: DFU_CMD_CLRSTATUS,
                value: 0,
                len: 0
            })
        );
    }
}
