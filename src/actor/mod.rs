//! # Actor Mailbox and Timer
//!
//! Every long-lived component (controller, power meter, weather, temperature,
//! uploader) runs as an actor: a single tokio task draining one mailbox.
//!
//! - Messages are handled one at a time, to completion, in FIFO order.
//! - Each actor owns at most one pending delayed self-message. Arming a new
//!   one always replaces the previous one.
//! - A handler returning an error stops the actor. Later sends fail with
//!   [`SendError::ActorStopped`].
//!
//! Request/response calls carry a `oneshot` reply channel inside the message
//! (see [`ActorHandle::ask`]).

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Error type for message delivery.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SendError {
    /// The actor has stopped and is no longer accepting messages.
    #[error("actor {0} has stopped")]
    ActorStopped(&'static str),
    /// The actor dropped the reply channel without answering.
    #[error("actor {0} did not reply")]
    NoReply(&'static str),
}

#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Send + 'static;

    /// Name used in logs and errors.
    const NAME: &'static str;

    async fn handle(&mut self, msg: Self::Message, ctx: &mut Context<Self::Message>) -> Result<()>;

    /// Runs once when the actor stops, whatever the reason.
    async fn on_stop(&mut self) {}
}

/// Cloneable address of a running actor.
pub struct ActorHandle<M> {
    name: &'static str,
    tx: mpsc::UnboundedSender<M>,
    token: CancellationToken,
}

impl<M> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            token: self.token.clone(),
        }
    }
}

impl<M> fmt::Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl<M: Send + 'static> ActorHandle<M> {
    /// Fire-and-forget enqueue. Fails as soon as a stop was requested.
    pub fn send(&self, msg: M) -> Result<(), SendError> {
        if self.token.is_cancelled() {
            return Err(SendError::ActorStopped(self.name));
        }
        self.tx
            .send(msg)
            .map_err(|_| SendError::ActorStopped(self.name))
    }

    /// Synchronous request: enqueue a message carrying a reply channel and
    /// wait for the answer.
    pub async fn ask<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> M,
    ) -> Result<R, SendError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| SendError::NoReply(self.name))
    }

}

impl<M> ActorHandle<M> {
    /// Request the actor to stop after the message in progress.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

struct PendingTimer<M> {
    deadline: Instant,
    message: M,
}

/// Per-actor execution context handed to every handler invocation.
pub struct Context<M> {
    handle: ActorHandle<M>,
    timer: Option<PendingTimer<M>>,
}

impl<M: Send + 'static> Context<M> {
    /// Address of the actor owning this context.
    pub fn handle(&self) -> ActorHandle<M> {
        self.handle.clone()
    }

    /// Cancel the pending timer, then arm a new one. A zero delay enqueues the
    /// message right away instead.
    pub fn schedule_after(&mut self, delay: Duration, msg: M) {
        self.cancel();
        if delay.is_zero() {
            // Only fails once the actor is already shutting down.
            let _ = self.handle.send(msg);
        } else {
            self.timer = Some(PendingTimer {
                deadline: Instant::now() + delay,
                message: msg,
            });
        }
    }

    /// Drop the pending timer. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        self.timer.take().is_some()
    }

    pub fn has_pending_timer(&self) -> bool {
        self.timer.is_some()
    }

    fn deadline(&self) -> Option<Instant> {
        self.timer.as_ref().map(|t| t.deadline)
    }

    fn take_timer(&mut self) -> Option<M> {
        self.timer.take().map(|t| t.message)
    }
}

enum Event<M> {
    Message(M),
    Timer(M),
    Closed,
    Cancelled,
}

/// Start `actor` on its own task.
pub fn spawn<A: Actor>(actor: A) -> (ActorHandle<A::Message>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ActorHandle {
        name: A::NAME,
        tx,
        token: CancellationToken::new(),
    };
    let ctx = Context {
        handle: handle.clone(),
        timer: None,
    };
    let task = tokio::spawn(run(actor, rx, ctx));
    (handle, task)
}

async fn run<A: Actor>(
    mut actor: A,
    mut rx: mpsc::UnboundedReceiver<A::Message>,
    mut ctx: Context<A::Message>,
) {
    let token = ctx.handle.token.clone();
    debug!(actor = A::NAME, "actor started");

    loop {
        let event = match ctx.deadline() {
            Some(deadline) => tokio::select! {
                biased;
                _ = token.cancelled() => Event::Cancelled,
                msg = rx.recv() => msg.map_or(Event::Closed, Event::Message),
                _ = tokio::time::sleep_until(deadline) => match ctx.take_timer() {
                    Some(msg) => Event::Timer(msg),
                    None => continue,
                },
            },
            None => tokio::select! {
                biased;
                _ = token.cancelled() => Event::Cancelled,
                msg = rx.recv() => msg.map_or(Event::Closed, Event::Message),
            },
        };

        let msg = match event {
            Event::Message(msg) => msg,
            Event::Timer(msg) => {
                debug!(actor = A::NAME, "timer fired");
                msg
            }
            Event::Closed | Event::Cancelled => break,
        };

        if let Err(e) = actor.handle(msg, &mut ctx).await {
            error!(actor = A::NAME, error = %e, "handler failed, actor stopping");
            break;
        }
    }

    ctx.cancel();
    token.cancel();
    rx.close();
    actor.on_stop().await;
    debug!(actor = A::NAME, "actor stopped");
}
