use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A message interface for [services](Service).
///
/// Most commonly, this interface is an enumeration of messages, but it can also be implemented on
/// a single message. For each individual message, this type needs to implement the
/// [`FromMessage`] trait.
///
/// # Implementating Interfaces
///
/// ```
/// use yastatsd_system::{FromMessage, Interface};
///
/// #[derive(Debug)]
/// struct Ping(u32);
///
/// #[derive(Debug)]
/// enum PingInterface {
///     Ping(Ping),
/// }
///
/// impl Interface for PingInterface {}
///
/// impl FromMessage<Ping> for PingInterface {
///     fn from_message(message: Ping) -> Self {
///         Self::Ping(message)
///     }
/// }
/// ```
pub trait Interface: Send + 'static {}

/// Services without messages can use `()` as their interface.
impl Interface for () {}

/// Declares a message as part of an [`Interface`].
///
/// All messages in this crate are fire-and-forget: the sender does not wait for a response. A
/// message that needs to report back carries its own channel.
pub trait FromMessage<M>: Interface {
    /// Converts the message into the service interface.
    fn from_message(message: M) -> Self;
}

/// Returned by [`Addr::try_send`] when the service has shut down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendError;

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to send message to service")
    }
}

impl std::error::Error for SendError {}

/// The address of a [`Service`].
///
/// Addresses allow to [send](Self::send) messages to a service that implements a corresponding
/// [`Interface`] as long as the service is running.
///
/// Addresses can be freely cloned. When the last clone of an address is dropped, the message
/// channel of the service closes permanently, which signals to the service that it can shut down.
pub struct Addr<I: Interface> {
    tx: mpsc::UnboundedSender<I>,
    queue_size: Arc<AtomicU64>,
}

impl<I: Interface> Addr<I> {
    /// Sends a message to the service and returns immediately.
    ///
    /// The communication channel with the service is unbounded, so backlogs could occur when
    /// sending too many messages. Messages sent to a service that has shut down are dropped.
    pub fn send<M>(&self, message: M)
    where
        I: FromMessage<M>,
    {
        self.try_send(message).ok();
    }

    /// Sends a message to the service and reports whether the service accepted it.
    pub fn try_send<M>(&self, message: M) -> Result<(), SendError>
    where
        I: FromMessage<M>,
    {
        self.queue_size.fetch_add(1, Ordering::SeqCst);
        self.tx.send(I::from_message(message)).map_err(|_| {
            self.queue_size.fetch_sub(1, Ordering::SeqCst);
            SendError
        })
    }

    /// Returns the number of messages waiting in the service's queue.
    pub fn len(&self) -> u64 {
        self.queue_size.load(Ordering::Relaxed)
    }

    /// Returns `true` if there are no messages waiting in the queue.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once the service has stopped receiving messages.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<I: Interface> fmt::Debug for Addr<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Addr")
            .field("open", &!self.tx.is_closed())
            .field("queue_size", &self.len())
            .finish()
    }
}

// Manually derive `Clone` since we do not require `I: Clone` and the Clone derive adds this
// constraint.
impl<I: Interface> Clone for Addr<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            queue_size: self.queue_size.clone(),
        }
    }
}

/// Inbound channel for messages sent through an [`Addr`].
///
/// This channel is meant to be polled in a [`Service`].
///
/// Instances are created automatically when [spawning](ServiceRunner::start) a service, or can be
/// created through [`channel`]. The channel closes when all associated [`Addr`]s are dropped.
pub struct Receiver<I: Interface> {
    rx: mpsc::UnboundedReceiver<I>,
    name: &'static str,
    queue_size: Arc<AtomicU64>,
}

impl<I: Interface> Receiver<I> {
    /// Receives the next value for this receiver.
    ///
    /// This method returns `None` if the channel has been closed and there are no remaining
    /// messages in the channel's buffer. This indicates that no further values can ever be
    /// received from this `Receiver`. The channel is closed when all senders have been dropped.
    ///
    /// This method is cancel safe and can be used in `select!` loops.
    pub async fn recv(&mut self) -> Option<I> {
        let value = self.rx.recv().await;

        if value.is_some() {
            self.queue_size.fetch_sub(1, Ordering::SeqCst);
        }

        value
    }

    /// Returns the next value if one is immediately available.
    pub fn try_recv(&mut self) -> Option<I> {
        let value = self.rx.try_recv().ok();

        if value.is_some() {
            self.queue_size.fetch_sub(1, Ordering::SeqCst);
        }

        value
    }

    /// Returns the name of the service this receiver belongs to.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<I: Interface> fmt::Debug for Receiver<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("name", &self.name)
            .field("queue_size", &self.queue_size.load(Ordering::Relaxed))
            .finish()
    }
}

/// Creates an unbounded channel for communicating with a [`Service`].
///
/// The `Addr` as the sending part provides public access to the service, while the `Receiver`
/// should remain internal to the service.
pub fn channel<I: Interface>(name: &'static str) -> (Addr<I>, Receiver<I>) {
    let queue_size = Arc::new(AtomicU64::new(0));
    let (tx, rx) = mpsc::unbounded_channel();

    let addr = Addr {
        tx,
        queue_size: queue_size.clone(),
    };

    let rx = Receiver {
        rx,
        name,
        queue_size,
    };

    (addr, rx)
}

/// An asynchronous unit responding to messages.
///
/// Services receive messages conforming to some [`Interface`] through an [`Addr`] and handle
/// them one by one. Internally, services are free to concurrently process these messages or not,
/// most probably should.
///
/// To start a service, create a service runner and call [`ServiceRunner::start`].
///
/// # Implementing Services
///
/// The standard way to implement services is through the `run` function. It receives an inbound
/// channel for all messages sent through the service's address:
///
/// ```no_run
/// use yastatsd_system::{FromMessage, Interface, Receiver, Service, ServiceRunner};
///
/// struct MyMessage;
///
/// impl Interface for MyMessage {}
///
/// impl FromMessage<Self> for MyMessage {
///     fn from_message(message: Self) -> Self {
///         message
///     }
/// }
///
/// struct MyService;
///
/// impl Service for MyService {
///     type Interface = MyMessage;
///
///     async fn run(self, mut rx: Receiver<Self::Interface>) {
///         while let Some(message) = rx.recv().await {
///             // handle the message
///         }
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut runner = ServiceRunner::new();
/// let addr = runner.start(MyService);
/// addr.send(MyMessage);
/// # }
/// ```
pub trait Service: Sized + Send + 'static {
    /// The interface of messages this service implements.
    ///
    /// The interface can be a single message type or an enumeration of all the messages that
    /// can be handled by this service.
    type Interface: Interface;

    /// Defines the main task of this service.
    ///
    /// `run` typically contains a loop that reads from `rx`, or a `select!` loop if it reads
    /// from multiple sources at once.
    fn run(self, rx: Receiver<Self::Interface>) -> impl Future<Output = ()> + Send + 'static;

    /// Starts the service in the current runtime and returns an address for it.
    ///
    /// The service runs in a detached tokio task that cannot be joined on. This is mainly useful
    /// for tests.
    fn start_detached(self) -> Addr<Self::Interface> {
        let (addr, rx) = channel(Self::name());
        spawn(self, rx);
        addr
    }

    /// Returns a unique name for this service implementation.
    ///
    /// This is used for internal diagnostics and uses the fully qualified type name of the service
    /// implementor by default.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

fn spawn<S: Service>(service: S, rx: Receiver<S::Interface>) -> JoinHandle<()> {
    let future = service.run(rx);
    tokio::spawn(future)
}

/// Keeps track of running services.
///
/// Exposes information about crashed services.
#[derive(Debug, Default)]
pub struct ServiceRunner {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl ServiceRunner {
    /// Creates a new service runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a service and starts tracking its join handle, exposing an [`Addr`] for message
    /// passing.
    pub fn start<S: Service>(&mut self, service: S) -> Addr<S::Interface> {
        let (addr, rx) = channel(S::name());
        self.handles.push((S::name(), spawn(service, rx)));
        addr
    }

    /// Awaits until all services have finished.
    ///
    /// Services that panicked are logged with their name.
    pub async fn join(self) {
        let (names, handles): (Vec<_>, Vec<_>) = self.handles.into_iter().unzip();

        for (name, result) in names.into_iter().zip(join_all(handles).await) {
            if let Err(error) = result {
                if error.is_panic() {
                    yastatsd_log::error!("service {name} panicked");
                }
            }
        }
    }
}
