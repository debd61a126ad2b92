use super::buffer::{AppendOutcome, ElementaryBuffer};
use super::control::FeedControl;
use super::demux::StreamDemultiplexer;
use super::elementary::{BufferedElementaryFeed, Channel, FeedSource};
use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::format::ts::tokenizer::TsTokenizer;
use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Called by the audio consumer before every pull; installing one turns
/// the feed into a pulled feed.
pub type WaitDataHandler = Arc<dyn Fn(&NetworkFeed) + Send + Sync>;

/// Receives a transport stream as UDP datagrams, unicast or multicast.
///
/// A receive thread appends every datagram to an accumulation buffer and
/// wakes the audio consumer. The consumer moves everything accumulated so
/// far through the demultiplexer and then drains its own channel.
pub struct NetworkFeed {
    demux: StreamDemultiplexer,
    pending: Arc<ElementaryBuffer>,
    socket: UdpSocket,
    port: u16,
    receiver: Mutex<Option<JoinHandle<()>>>,
    wait_data: RwLock<Option<WaitDataHandler>>,
}

impl NetworkFeed {
    /// Listens for unicast datagrams on `port` of every interface.
    pub fn bind(port: u16) -> Result<Self> {
        Self::with_config(None, port, &FeedConfig::default())
    }

    /// Joins the IPv4 multicast `group` on `port`.
    pub fn join(group: IpAddr, port: u16) -> Result<Self> {
        Self::with_config(Some(group), port, &FeedConfig::default())
    }

    pub fn with_config(group: Option<IpAddr>, port: u16, config: &FeedConfig) -> Result<Self> {
        let group = match group {
            Some(IpAddr::V4(group)) if group.is_multicast() => Some(group),
            Some(other) => return Err(FeedError::InvalidMulticast(other)),
            None => None,
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        if let Err(err) = socket.set_recv_buffer_size(config.socket_receive_buffer) {
            warn!("receive buffer of {} bytes refused: {}", config.socket_receive_buffer, err);
        }
        if group.is_some() {
            socket.set_reuse_address(true)?;
        }
        let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        socket.bind(&address.into())?;
        if let Some(group) = group {
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        }
        socket.set_read_timeout(Some(config.receive_timeout))?;

        let socket: UdpSocket = socket.into();
        let port = socket.local_addr()?.port();

        let demux = StreamDemultiplexer::with_tokenizer(Box::new(TsTokenizer::new()), config);
        let pending = Arc::new(ElementaryBuffer::new(config.network_capacity));

        let receiver = {
            let socket = socket.try_clone()?;
            let pending = pending.clone();
            let control = demux.elementary_feed().control().clone();
            let datagram_size = config.datagram_buffer.max(1);
            thread::Builder::new()
                .name("ts-receiver".to_string())
                .spawn(move || receive(socket, pending, control, datagram_size))?
        };

        match group {
            Some(group) => info!("joined {} on port {}", group, port),
            None => info!("listening on port {}", port),
        }

        Ok(Self {
            demux,
            pending,
            socket,
            port,
            receiver: Mutex::new(Some(receiver)),
            wait_data: RwLock::new(None),
        })
    }

    pub fn demux(&self) -> &StreamDemultiplexer {
        &self.demux
    }

    /// The bound port, resolved if zero was requested.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_wait_data(&self, handler: Option<WaitDataHandler>) {
        *self.wait_data.write() = handler;
    }
}

fn receive(
    socket: UdpSocket,
    pending: Arc<ElementaryBuffer>,
    control: Arc<FeedControl>,
    datagram_size: usize,
) {
    let mut datagram = vec![0u8; datagram_size];
    while !control.is_disposing() {
        let read = match socket.recv(&mut datagram) {
            Ok(read) => read,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(err) => {
                debug!("receive stopped: {}", err);
                break;
            }
        };
        if read == 0 {
            continue;
        }

        // a datagram that does not fit is lost
        if let AppendOutcome::Stored { .. } =
            pending.append(&datagram[..read], || control.is_disposing())
        {
            control.report_audio_available();
        }
    }
    debug!("receive thread finished");
}

impl FeedSource for NetworkFeed {
    fn elementary(&self) -> &BufferedElementaryFeed {
        self.demux.elementary()
    }

    fn control(&self) -> &FeedControl {
        self.demux.control()
    }

    fn next_chunk(&self, channel: Channel) -> Option<Bytes> {
        if channel == Channel::Video {
            return self.demux.next_chunk(channel);
        }

        let handler = self.wait_data.read().clone();
        if let Some(handler) = &handler {
            handler(self);
        }
        self.control().set_external_feed(handler.is_none());

        if let Some(data) = self.pending.drain(|| self.control().is_disposing()) {
            self.demux.add_payload(&data);
        }
        self.demux.next_chunk(channel)
    }

    fn clear_buffers(&self) {
        self.pending.clear();
        self.demux.clear_buffers();
    }

    fn stop(&self) {
        self.demux.stop();
    }

    fn on_dispose(&self) {
        let _ = SockRef::from(&self.socket).shutdown(Shutdown::Both);
        if let Some(receiver) = self.receiver.lock().take() {
            let _ = receiver.join();
        }
        self.demux.on_dispose();
    }
}

impl Drop for NetworkFeed {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::testing::{audio_pes, recording};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn loopback_feed() -> NetworkFeed {
        let config = FeedConfig::default()
            .with_network_capacity(64 * 1024)
            .with_receive_timeout(Duration::from_millis(20));
        NetworkFeed::with_config(None, 0, &config).unwrap()
    }

    #[test]
    fn test_rejects_non_multicast_group() {
        let err = NetworkFeed::join("10.0.0.1".parse().unwrap(), 0).err().unwrap();
        assert!(matches!(err, FeedError::InvalidMulticast(_)));

        let err = NetworkFeed::join("ff02::1".parse().unwrap(), 0).err().unwrap();
        assert!(matches!(err, FeedError::InvalidMulticast(_)));
    }

    #[test]
    fn test_unicast_datagram_reaches_audio() {
        let _ = env_logger::builder().is_test(true).try_init();
        let feed = loopback_feed();
        assert_ne!(feed.port(), 0);
        assert!(feed.control().is_external_feed());
        feed.start();

        let pes = audio_pes(0x44);
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&recording(&[pes.clone()]), ("127.0.0.1", feed.port()))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut audio = Vec::new();
        while audio.len() < pes.len() && Instant::now() < deadline {
            match feed.next_chunk(Channel::Audio) {
                Some(chunk) => audio.extend_from_slice(&chunk),
                None => thread::sleep(Duration::from_millis(5)),
            }
        }
        assert_eq!(audio, pes);
        assert_eq!(feed.demux().pid_mapping().audio, crate::feed::testing::AUDIO_PID);
    }

    #[test]
    fn test_wait_handler_switches_to_pull() {
        let feed = loopback_feed();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        feed.set_wait_data(Some(Arc::new(move |_: &NetworkFeed| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(feed.next_chunk(Channel::Audio).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!feed.control().is_external_feed());

        feed.set_wait_data(None);
        feed.next_chunk(Channel::Audio);
        assert!(feed.control().is_external_feed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_joins_receiver() {
        let feed = loopback_feed();
        feed.dispose();
        assert!(feed.receiver.lock().is_none());
        assert!(!feed.demux().add_payload(&[0x47; 188]));
    }
}
