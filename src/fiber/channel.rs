use std::{
    collections::VecDeque,
    marker::PhantomData,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
    sync::Mutex as StdMutex,
    time::Duration,
};

use crate::clock;

////////////////////////////////////////////////////////////////////////////////
// Channel
////////////////////////////////////////////////////////////////////////////////

/// A bounded channel for passing values between fibers.
///
/// A full or empty channel is not slept on by the OS thread: the fiber spins
/// on [`crate::fiber::yield_now`] until a slot opens up, the deadline passes,
/// or the channel is disconnected. This is the same trade made by
/// [`super::mutex::Mutex`] and is only appropriate because a worker thread
/// always has other runnable fibers to make progress on while one of them
/// waits.
pub(super) struct Channel<T> {
    queue: StdMutex<VecDeque<T>>,
    capacity: usize,
    tx_count: AtomicUsize,
    rx_count: AtomicUsize,
    marker: PhantomData<T>,
}

impl<T> Channel<T> {
    pub fn new(capacity: u32) -> Self {
        Self {
            queue: StdMutex::new(VecDeque::new()),
            capacity: capacity.max(1) as usize,
            tx_count: AtomicUsize::new(0),
            rx_count: AtomicUsize::new(0),
            marker: PhantomData,
        }
    }

    pub fn send(&self, t: T, timeout: Option<Duration>) -> Result<(), SendError<T>> {
        if self.rx_count.load(Ordering::Acquire) == 0 {
            return Err(SendError::Disconnected(t));
        }
        let deadline = timeout.map(|d| clock::now() + d);
        let mut value = Some(t);
        loop {
            {
                let mut q = self.queue.lock().unwrap();
                if q.len() < self.capacity {
                    q.push_back(value.take().unwrap());
                    return Ok(());
                }
            }
            if self.rx_count.load(Ordering::Acquire) == 0 {
                return Err(SendError::Disconnected(value.unwrap()));
            }
            if let Some(deadline) = deadline {
                if clock::now() >= deadline {
                    return Err(SendError::Timeout(value.unwrap()));
                }
            }
            crate::fiber::yield_now();
        }
    }

    pub fn recv(&self, timeout: Option<Duration>) -> Result<T, RecvError> {
        let deadline = timeout.map(|d| clock::now() + d);
        loop {
            {
                let mut q = self.queue.lock().unwrap();
                if let Some(t) = q.pop_front() {
                    return Ok(t);
                }
            }
            if self.tx_count.load(Ordering::Acquire) == 0 {
                return Err(RecvError::Disconnected);
            }
            if let Some(deadline) = deadline {
                if clock::now() >= deadline {
                    return Err(RecvError::Timeout);
                }
            }
            crate::fiber::yield_now();
        }
    }

    fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Sender / Receiver
////////////////////////////////////////////////////////////////////////////////

pub struct Sender<T> {
    chan: Rc<Channel<T>>,
}

impl<T> Sender<T> {
    pub(super) fn new(chan: Rc<Channel<T>>) -> Self {
        chan.tx_count.fetch_add(1, Ordering::AcqRel);
        Self { chan }
    }

    pub fn send(&self, t: T) -> Result<(), T> {
        self.chan.send(t, None).map_err(|e| match e {
            SendError::Timeout(_) => unreachable!("send with no timeout cannot time out"),
            SendError::Disconnected(t) => t,
        })
    }

    pub fn send_timeout(&self, t: T, timeout: Duration) -> Result<(), SendError<T>> {
        self.chan.send(t, Some(timeout))
    }

    pub fn try_send(&self, t: T) -> Result<(), TrySendError<T>> {
        self.send_timeout(t, Duration::ZERO).map_err(From::from)
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self::new(self.chan.clone())
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.chan.tx_count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SendError<T> {
    Timeout(T),
    Disconnected(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Timeout(t) | Self::Disconnected(t) => t,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TrySendError<T> {
    Full(T),
    Disconnected(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(t) | Self::Disconnected(t) => t,
        }
    }
}

impl<T> From<SendError<T>> for TrySendError<T> {
    fn from(e: SendError<T>) -> Self {
        match e {
            SendError::Disconnected(t) => Self::Disconnected(t),
            SendError::Timeout(t) => Self::Full(t),
        }
    }
}

pub struct Receiver<T> {
    chan: Rc<Channel<T>>,
}

impl<T> Receiver<T> {
    pub(super) fn new(chan: Rc<Channel<T>>) -> Self {
        chan.rx_count.fetch_add(1, Ordering::AcqRel);
        Self { chan }
    }

    pub fn recv(&self) -> Option<T> {
        match self.chan.recv(None) {
            Err(RecvError::Timeout) => unreachable!("recv with no timeout cannot time out"),
            res => res.ok(),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvError> {
        self.chan.recv(Some(timeout))
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.recv_timeout(Duration::ZERO).map_err(From::from)
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter { rx: self }
    }

    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter { rx: self }
    }

    pub fn is_empty(&self) -> bool {
        self.chan.is_empty()
    }
}

pub struct Iter<'a, T: 'a> {
    rx: &'a Receiver<T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.rx.recv()
    }
}

pub struct TryIter<'a, T: 'a> {
    rx: &'a Receiver<T>,
}

impl<'a, T> Iterator for TryIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self::new(self.chan.clone())
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.chan.rx_count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecvError {
    Timeout,
    Disconnected,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TryRecvError {
    Empty,
    Disconnected,
}

impl From<RecvError> for TryRecvError {
    fn from(e: RecvError) -> Self {
        match e {
            RecvError::Disconnected => Self::Disconnected,
            RecvError::Timeout => Self::Empty,
        }
    }
}

/// Creates a bounded sender/receiver pair backed by a single shared queue.
pub fn channel<T>(capacity: u32) -> (Sender<T>, Receiver<T>) {
    let chan = Rc::new(Channel::new(capacity));
    (Sender::new(chan.clone()), Receiver::new(chan))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_recv() {
        let (tx, rx) = channel::<i32>(4);
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(rx.recv(), Some(1));
        assert_eq!(rx.recv(), Some(2));
    }

    #[test]
    fn try_recv_empty() {
        let (_tx, rx) = channel::<i32>(1);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn disconnect_on_drop() {
        let (tx, rx) = channel::<i32>(1);
        drop(tx);
        assert_eq!(rx.recv(), None);
    }
}
