//! MLLP client connection.
//!
//! Messages are framed as `0x0B <message> 0x1C 0x0D`. The client keeps one TCP connection open
//! and serialises sends on it; each send blocks until the acknowledgement frame is read.

use crate::message::{Acknowledgement, Message};
use crate::{Hl7Error, Hl7Result};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;

/// Start of block.
pub const START_BLOCK: u8 = 0x0B;
/// End of block.
pub const END_BLOCK: u8 = 0x1C;
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// Wrap an encoded message in an MLLP frame.
pub fn frame(payload: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.push(START_BLOCK);
    out.extend_from_slice(payload.as_bytes());
    out.push(END_BLOCK);
    out.push(CARRIAGE_RETURN);
    out
}

/// Read one MLLP frame and return its payload.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Hl7Result<String> {
    let mut buffer = Vec::new();
    loop {
        let read = reader.read_until(END_BLOCK, &mut buffer)?;
        if read == 0 {
            return Err(Hl7Error::Framing(
                "connection closed before end of block".into(),
            ));
        }
        if buffer.last() == Some(&END_BLOCK) {
            break;
        }
    }

    let mut trailer = [0u8; 1];
    reader.read_exact(&mut trailer)?;
    if trailer[0] != CARRIAGE_RETURN {
        return Err(Hl7Error::Framing(format!(
            "expected carriage return after end of block, got 0x{:02X}",
            trailer[0]
        )));
    }

    let start = buffer
        .iter()
        .position(|b| *b == START_BLOCK)
        .ok_or_else(|| Hl7Error::Framing("frame has no start of block".into()))?;
    let payload = &buffer[start + 1..buffer.len() - 1];
    String::from_utf8(payload.to_vec())
        .map_err(|e| Hl7Error::Framing(format!("frame is not UTF-8: {e}")))
}

/// One open connection. The reader lives as long as the stream so bytes it buffered past an
/// acknowledgement are still there for the next exchange.
#[derive(Debug)]
struct Connection {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Connection {
    fn open(address: &str) -> Hl7Result<Self> {
        let writer = TcpStream::connect(address)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self { writer, reader })
    }
}

/// Blocking MLLP client over a single lazily opened TCP connection.
#[derive(Debug)]
pub struct MllpClient {
    address: String,
    connection: Mutex<Option<Connection>>,
}

impl MllpClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            address: format!("{host}:{port}"),
            connection: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send a message and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be opened, the write fails or the reply is not a
    /// well-formed acknowledgement. A failed connection is dropped and reopened on the next send.
    pub fn send(&self, message: &Message) -> Hl7Result<Acknowledgement> {
        let mut guard = self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let result = self.exchange(&mut guard, &message.encode());
        if result.is_err() {
            *guard = None;
        }
        let reply = result?;
        Acknowledgement::from_message(&Message::parse(&reply)?)
    }

    fn exchange(&self, slot: &mut Option<Connection>, payload: &str) -> Hl7Result<String> {
        if slot.is_none() {
            tracing::debug!(address = %self.address, "opening MLLP connection");
            *slot = Some(Connection::open(&self.address)?);
        }
        let connection = slot
            .as_mut()
            .ok_or_else(|| Hl7Error::Framing("connection unavailable".into()))?;
        connection.writer.write_all(&frame(payload))?;
        connection.writer.flush()?;
        read_frame(&mut connection.reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn read_frame_strips_envelope() {
        let mut cursor = Cursor::new(frame("MSH|^~\\&\rMSA|AA|1\r"));
        let payload = read_frame(&mut cursor).unwrap();
        assert_eq!(payload, "MSH|^~\\&\rMSA|AA|1\r");
    }

    #[test]
    fn read_frame_rejects_truncated_input() {
        let mut cursor = Cursor::new(vec![START_BLOCK, b'M', b'S', b'H']);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(Hl7Error::Framing(_))
        ));
    }

    #[test]
    fn sends_over_one_connection_and_reads_acks() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut received = Vec::new();
            for _ in 0..2 {
                let inbound = read_frame(&mut reader).unwrap();
                let control_id = Message::parse(&inbound)
                    .unwrap()
                    .control_id()
                    .unwrap_or_default()
                    .to_string();
                let ack = format!("MSH|^~\\&|||||20230502||ACK|a|P|2.8.1\rMSA|AA|{control_id}\r");
                writer.write_all(&frame(&ack)).unwrap();
                received.push(inbound);
            }
            received
        });

        let client = MllpClient::new("127.0.0.1", port);
        let first = Message::parse("MSH|^~\\&|||||20230502||ORU^R01|c1|P|2.8.1\rPID|1\r").unwrap();
        let second = Message::parse("MSH|^~\\&|||||20230502||RDE^O11|c2|P|2.8.1\rPID|1\r").unwrap();

        let ack1 = client.send(&first).unwrap();
        let ack2 = client.send(&second).unwrap();
        assert!(ack1.is_accepted());
        assert_eq!(ack1.control_id.as_deref(), Some("c1"));
        assert_eq!(ack2.control_id.as_deref(), Some("c2"));

        let received = server.join().unwrap();
        assert_eq!(received.len(), 2);
        assert!(received[1].contains("RDE^O11"));
    }

    #[test]
    fn acks_arriving_together_are_both_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;

            read_frame(&mut reader).unwrap();
            // Both acknowledgements go out in a single write.
            let mut acks = frame("MSH|^~\\&|||||20230502||ACK|a1|P|2.8.1\rMSA|AA|c1\r");
            acks.extend(frame("MSH|^~\\&|||||20230502||ACK|a2|P|2.8.1\rMSA|AA|c2\r"));
            writer.write_all(&acks).unwrap();
            read_frame(&mut reader).unwrap()
        });

        let client = MllpClient::new("127.0.0.1", port);
        let first = Message::parse("MSH|^~\\&|||||20230502||ORU^R01|c1|P|2.8.1\rPID|1\r").unwrap();
        let second = Message::parse("MSH|^~\\&|||||20230502||RDE^O11|c2|P|2.8.1\rPID|1\r").unwrap();

        let ack1 = client.send(&first).unwrap();
        let ack2 = client.send(&second).unwrap();
        assert_eq!(ack1.control_id.as_deref(), Some("c1"));
        assert_eq!(ack2.control_id.as_deref(), Some("c2"));
        assert!(ack2.is_accepted());

        assert!(server.join().unwrap().contains("RDE^O11"));
    }

    #[test]
    fn send_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = MllpClient::new("127.0.0.1", port);
        let message = Message::parse("MSH|^~\\&|||||20230502||ORU^R01|c1|P|2.8.1\r").unwrap();
        assert!(matches!(client.send(&message), Err(Hl7Error::Io(_))));
    }
}
