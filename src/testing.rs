//! In-memory bridge used by the unit tests
//!
//! `MockPort` plays the firmware side of the 8-bit bus protocol: it parses
//! every frame written to it, records the frame with its payload, and queues
//! the response a read-type request expects.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use crate::protocol::frame_config;
use crate::protocol::tuna::{Frame, Request, Transfer, FRAME_SIZE};
use crate::protocol::tuna32;

/// One request as seen by the bridge
#[derive(Debug, Clone)]
pub struct Recorded {
    pub frame: Frame,
    pub payload: Vec<u8>,
}

impl Recorded {
    pub fn is(&self, request: Request) -> bool {
        self.frame.request() == Some(request)
    }

    /// First payload byte, for single-byte register writes
    pub fn data(&self) -> u8 {
        self.payload[0]
    }
}

type Responder = Box<dyn FnMut(&Frame, &[Recorded]) -> Vec<u8>>;
type Observer = Box<dyn FnMut(&Recorded)>;

pub struct MockPort {
    pub written: Vec<u8>,
    pub truncate_responses_to: Option<usize>,
    pub stall_responses: bool,
    /// Refuse the header of frame number N (counted from 0), once
    pub reject_frame: Option<usize>,
    records: Vec<Recorded>,
    pending: Vec<u8>,
    responses: VecDeque<u8>,
    responder: Responder,
    observer: Option<Observer>,
}

impl Default for MockPort {
    fn default() -> Self {
        MockPort {
            written: Vec::new(),
            truncate_responses_to: None,
            stall_responses: false,
            reject_frame: None,
            records: Vec::new(),
            pending: Vec::new(),
            responses: VecDeque::new(),
            responder: Box::new(|frame, _| vec![0; frame.length as usize]),
            observer: None,
        }
    }
}

impl MockPort {
    /// Port whose read responses are produced by `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&Frame, &[Recorded]) -> Vec<u8> + 'static,
    {
        MockPort {
            responder: Box::new(responder),
            ..MockPort::default()
        }
    }

    /// Also hand every request without a response to `observer`, in order
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&Recorded) + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn frames(&self) -> &[Recorded] {
        &self.records
    }

    /// Frames of one request type
    pub fn of(&self, request: Request) -> Vec<&Recorded> {
        self.records.iter().filter(|r| r.is(request)).collect()
    }

    fn parse_pending(&mut self) {
        loop {
            if self.pending.len() < FRAME_SIZE {
                return;
            }
            let (frame, _): (Frame, usize) =
                bincode::decode_from_slice(&self.pending[..FRAME_SIZE], frame_config())
                    .expect("frame decodes");
            let transfer = frame
                .request()
                .map(Request::transfer)
                .unwrap_or(Transfer::Register);
            let payload_len = match transfer {
                Transfer::Out | Transfer::Echo => frame.length as usize,
                _ => 0,
            };
            if self.pending.len() < FRAME_SIZE + payload_len {
                return;
            }
            let payload = self.pending[FRAME_SIZE..FRAME_SIZE + payload_len].to_vec();
            self.pending.drain(..FRAME_SIZE + payload_len);

            let response = match transfer {
                Transfer::In => Some((self.responder)(&frame, &self.records)),
                Transfer::Echo => Some(payload.clone()),
                _ => None,
            };
            let record = Recorded { frame, payload };
            if response.is_none() {
                if let Some(observer) = self.observer.as_mut() {
                    observer(&record);
                }
            }
            self.records.push(record);

            if let Some(mut response) = response {
                if let Some(limit) = self.truncate_responses_to {
                    response.truncate(limit);
                }
                if !self.stall_responses {
                    self.responses.extend(response);
                }
            }
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pending.is_empty() && self.reject_frame == Some(self.records.len()) {
            self.reject_frame = None;
            return Ok(0);
        }
        self.written.extend_from_slice(buf);
        self.pending.extend_from_slice(buf);
        self.parse_pending();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.responses.is_empty() && self.stall_responses {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no response"));
        }
        let n = buf.len().min(self.responses.len());
        for (slot, byte) in buf.iter_mut().zip(self.responses.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Firmware side of the 32-bit bus protocol
///
/// Only read-type requests are answered, with whatever `fill` returns.
pub struct WidePort {
    pub written: Vec<u8>,
    pub frames: Vec<tuna32::Frame>,
    pending: Vec<u8>,
    responses: VecDeque<u8>,
    fill: Box<dyn FnMut(&tuna32::Frame) -> Vec<u8>>,
}

impl Default for WidePort {
    fn default() -> Self {
        WidePort {
            written: Vec::new(),
            frames: Vec::new(),
            pending: Vec::new(),
            responses: VecDeque::new(),
            fill: Box::new(|frame| vec![0; frame.length as usize]),
        }
    }
}

impl WidePort {
    pub fn with_fill<F>(fill: F) -> Self
    where
        F: FnMut(&tuna32::Frame) -> Vec<u8> + 'static,
    {
        WidePort {
            fill: Box::new(fill),
            ..WidePort::default()
        }
    }
}

impl Write for WidePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        self.pending.extend_from_slice(buf);
        while self.pending.len() >= tuna32::FRAME_SIZE {
            let (frame, _): (tuna32::Frame, usize) =
                bincode::decode_from_slice(&self.pending[..tuna32::FRAME_SIZE], frame_config())
                    .expect("frame decodes");
            self.pending.drain(..tuna32::FRAME_SIZE);
            let reads = tuna32::Request::from_u32(frame.request).is_some_and(tuna32::Request::returns_data);
            if reads {
                let response = (self.fill)(&frame);
                self.responses.extend(response);
            }
            self.frames.push(frame);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for WidePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.responses.len());
        for (slot, byte) in buf.iter_mut().zip(self.responses.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
