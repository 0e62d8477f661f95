//! Message transport between supervisor and worker.
//!
//! The wire is line-delimited JSON over a pair of one-way pipes, but both
//! sides only ever see the narrow send/receive seam below, so the transport
//! stays swappable (the in-memory channel variant backs the in-process
//! tests).

use std::io::{self, BufRead, BufReader, Read, Write};
use std::thread;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Outcome of one blocking receive.
#[derive(Debug)]
pub enum Received<T> {
    /// A well-formed message.
    Message(T),
    /// A line arrived but did not parse; carries the parse error text.
    Malformed(String),
    /// The peer is gone; no further messages will arrive.
    Closed,
}

/// Send half of a worker link.
pub trait MessageSender<T>: Send {
    fn send(&mut self, message: &T) -> io::Result<()>;
}

/// Blocking receive half of a worker link.
pub trait MessageReceiver<T>: Send {
    fn receive(&mut self) -> Received<T>;
}

/// Writes one JSON object per line, flushing after each message.
pub struct JsonLinesWriter<W: Write> {
    inner: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<T: Serialize, W: Write + Send> MessageSender<T> for JsonLinesWriter<W> {
    fn send(&mut self, message: &T) -> io::Result<()> {
        let line = serde_json::to_string(message)?;
        writeln!(self.inner, "{line}")?;
        self.inner.flush()
    }
}

/// Reads one JSON object per line, skipping blank lines.
pub struct JsonLinesReader<R: Read> {
    lines: io::Lines<BufReader<R>>,
}

impl<R: Read> JsonLinesReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }
}

impl<T: DeserializeOwned, R: Read + Send> MessageReceiver<T> for JsonLinesReader<R> {
    fn receive(&mut self) -> Received<T> {
        loop {
            match self.lines.next() {
                None => return Received::Closed,
                // A read error on a pipe means the peer is gone.
                Some(Err(_)) => return Received::Closed,
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => {
                    return match serde_json::from_str(&line) {
                        Ok(message) => Received::Message(message),
                        Err(e) => Received::Malformed(format!("parse error: {e}")),
                    };
                }
            }
        }
    }
}

/// In-memory sender over a crossbeam channel.
pub struct ChannelSender<T>(pub crossbeam_channel::Sender<T>);

impl<T: Clone + Send> MessageSender<T> for ChannelSender<T> {
    fn send(&mut self, message: &T) -> io::Result<()> {
        self.0
            .send(message.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"))
    }
}

/// In-memory receiver over a crossbeam channel.
pub struct ChannelReceiver<T>(pub crossbeam_channel::Receiver<T>);

impl<T: Send> MessageReceiver<T> for ChannelReceiver<T> {
    fn receive(&mut self) -> Received<T> {
        self.0.recv().map_or(Received::Closed, Received::Message)
    }
}

/// Decouples blocking pipe reads from the consuming loop: a dedicated thread
/// pulls lines off the reader and feeds them into an unbounded channel. When
/// the pipe closes (peer died), the channel disconnects and the consumer
/// observes [`Received::Closed`].
pub struct ThreadedReceiver<T> {
    rx: crossbeam_channel::Receiver<Received<T>>,
}

impl<T: DeserializeOwned + Send + 'static> ThreadedReceiver<T> {
    pub fn spawn<R: Read + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::spawn(move || {
            let mut lines = JsonLinesReader::new(reader);
            loop {
                let item: Received<T> = lines.receive();
                let closed = matches!(item, Received::Closed);
                if tx.send(item).is_err() || closed {
                    break;
                }
            }
        });
        Self { rx }
    }
}

impl<T: Send> MessageReceiver<T> for ThreadedReceiver<T> {
    fn receive(&mut self) -> Received<T> {
        match self.rx.recv() {
            Ok(item) => item,
            Err(_) => Received::Closed,
        }
    }
}
