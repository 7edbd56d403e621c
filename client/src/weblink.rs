//! Generic framed-message pump: an outbound FIFO, a serializer on the way
//! out, a deserializer on the way in, and owner callbacks for everything
//! that happens. The pump owns the transport buffers; the owner owns the
//! messages.

use futures::channel::mpsc;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use framewire_codec::deserialize::BodyProvider;
use framewire_codec::serialize::Element;
use framewire_codec::{Deserializer, Serializer};

/// Owner of a [`WebLink`]. `link_body` (from [`BodyProvider`]) is invoked
/// before body bytes of an inbound element start flowing; the rest mirror
/// the message lifecycle. Every callback runs on the pump task.
pub trait LinkHandler<Out: Element, In: Element>: BodyProvider<In> + Send + 'static {
    /// A complete inbound element.
    fn received(&mut self, element: In);
    /// An outbound element whose emission finished.
    fn sent(&mut self, element: Out);
    /// Transport opened/closed.
    fn state_change(&mut self, opened: bool);
}

/// Handle onto a running pump; cheap to clone.
#[derive(Clone)]
pub struct WebLink<Out> {
    to_task: mpsc::Sender<Out>,
}

impl<Out: Element + Send + 'static> WebLink<Out> {
    /// Spawns the pump over `stream`. The FIFO holds at most `queue_size`
    /// submitted elements.
    pub fn open<In, S, H>(stream: S, handler: H, queue_size: usize) -> WebLink<Out>
    where
        In: Element + Send + 'static,
        S: AsyncRead + AsyncWrite + Send + 'static,
        H: LinkHandler<Out, In>,
    {
        let (to_task, from_front) = mpsc::channel(queue_size);
        tokio::spawn(run(stream, from_front, handler));
        WebLink { to_task }
    }

    /// Appends an element to the outbound FIFO; false when the FIFO is full
    /// or the pump is gone.
    pub fn submit(&self, element: Out) -> bool {
        self.to_task.clone().try_send(element).is_ok()
    }

    /// Closes the outbound side; the pump exits once the FIFO drains.
    pub fn close(&self) {
        self.to_task.clone().close_channel();
    }
}

async fn run<Out, In, S, H>(stream: S, mut from_front: mpsc::Receiver<Out>, mut handler: H)
where
    Out: Element,
    In: Element,
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: LinkHandler<Out, In>,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut serializer: Serializer<Out> = Serializer::new();
    let mut deserializer: Deserializer<In> = Deserializer::new();
    let mut write_buffer = [0u8; 4096];
    let mut read_buffer = [0u8; 4096];

    handler.state_change(true);

    loop {
        tokio::select! {
            outbound = from_front.next() => match outbound {
                Some(element) => {
                    if serializer.submit(element).is_err() {
                        log::error!("[weblink] Serializer busy on submit");
                        continue;
                    }
                    loop {
                        let written = serializer.serialize(&mut write_buffer);
                        if written == 0 {
                            break;
                        }
                        if writer.write_all(&write_buffer[..written]).await.is_err() {
                            handler.state_change(false);
                            return;
                        }
                    }
                    if let Some(element) = serializer.finished() {
                        handler.sent(element);
                    }
                }
                None => break,
            },
            result = reader.read(&mut read_buffer) => match result {
                Ok(0) => break,
                Ok(received) => {
                    let completed = deserializer.consume(&read_buffer[..received], &mut handler);
                    for element in completed {
                        handler.received(element);
                    }
                }
                Err(error) => {
                    log::debug!("[weblink] Read failed: {}", error);
                    break;
                }
            },
        }
    }

    handler.state_change(false);
}
