//! Concurrent update multiplexer.

use crate::api::types::UpdateType;
use crate::stream::Update;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Update stream subscription preferences for [`Mux::subscribe`]. The
/// `updates` and `commands` filters complement each other.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOpts {
    /// If set, all other options are ignored and every update is sent via
    /// the subscription stream.
    pub all: bool,
    pub updates: Vec<UpdateType>,
    /// Slash commands (`"/start"`) matched against `message` updates.
    pub commands: Vec<String>,
}

/// Opaque subscription key returned by [`Mux::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubKey(u64);

struct Subscriber {
    all: bool,
    updates: HashSet<UpdateType>,
    commands: HashSet<String>,
    /// Fired by unsubscribe; every worker confirms it before the subscriber
    /// is removed for good.
    done: CancellationToken,
    /// Per-worker confirmation slots.
    done_confirmed_by: Box<[AtomicBool]>,
    /// Count of workers that confirmed; at `n_workers` the subscriber goes.
    done_confirmed_n: AtomicU32,
    tx: mpsc::Sender<Update>,
}

struct Shared {
    n_workers: usize,
    closed: AtomicBool,
    sub_capacity: usize,
    next_sub_id: AtomicU64,
    subs: DashMap<SubKey, Arc<Subscriber>>,
}

/// Update multiplexer with dynamic subscriptions and concurrent routing of
/// incoming updates. Closing of subscriber streams is handled automatically
/// once the incoming stream closes.
///
/// With a single worker every subscriber sees updates in input order; more
/// workers trade per-subscriber ordering for routing throughput.
pub struct Mux {
    shared: Arc<Shared>,
}

impl Mux {
    /// Creates and starts a mux with the given number of workers, routing
    /// from `input` until it closes. `workers < 1` defaults to 1.
    pub fn new(input: mpsc::Receiver<Update>, workers: usize) -> Mux {
        let workers = workers.max(1);
        let shared = Arc::new(Shared {
            n_workers: workers,
            closed: AtomicBool::new(false),
            sub_capacity: input.max_capacity(),
            next_sub_id: AtomicU64::new(0),
            subs: DashMap::new(),
        });

        let input = Arc::new(Mutex::new(input));
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker_id| {
                let shared = shared.clone();
                let input = input.clone();
                tokio::spawn(process(shared, input, worker_id))
            })
            .collect();

        // Sweeper: once all workers exit (the input stream closed), close
        // every still-registered subscriber stream.
        let sweeper = shared.clone();
        tokio::spawn(async move {
            for handle in handles {
                let _ = handle.await;
            }
            sweeper.closed.store(true, Ordering::SeqCst);
            sweeper.subs.clear();
        });

        Mux { shared }
    }

    /// Creates a subscriber which receives matching updates via the
    /// returned stream; the key can be used to unsubscribe later. Returns
    /// `None` if the mux has already shut down.
    pub fn subscribe(&self, opts: SubscriptionOpts) -> Option<(SubKey, mpsc::Receiver<Update>)> {
        let shared = &self.shared;
        // Keys are unique because the counter only ever goes up.
        let key = SubKey(shared.next_sub_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::channel(shared.sub_capacity.max(1));
        let mut sub = Subscriber {
            all: opts.all,
            updates: HashSet::new(),
            commands: HashSet::new(),
            done: CancellationToken::new(),
            done_confirmed_by: (0..shared.n_workers).map(|_| AtomicBool::new(false)).collect(),
            done_confirmed_n: AtomicU32::new(0),
            tx,
        };
        if !opts.all {
            sub.updates = opts.updates.into_iter().collect();
            sub.commands = opts.commands.into_iter().collect();
        }
        shared.subs.insert(key, Arc::new(sub));

        // NOW check whether the mux shut down, since it might have happened
        // while we were setting everything up. If it shuts down after this
        // check instead, the new entry is already in the map and gets swept
        // along with the others.
        if shared.closed.load(Ordering::SeqCst) {
            shared.subs.remove(&key);
            return None;
        }
        Some((key, rx))
    }

    /// Removes the subscriber with the given key, if one exists. The
    /// subscriber's stream closes once every worker has confirmed the
    /// removal. Only needed for dynamic removal: remaining subscribers are
    /// cleaned up automatically when the input stream closes. Do not
    /// unsubscribe the same key twice.
    pub fn unsubscribe(&self, key: SubKey) {
        if let Some(sub) = self.shared.subs.get(&key).map(|entry| entry.value().clone()) {
            // Notify the workers; they close the subscriber as soon as all
            // of them have seen the signal.
            sub.done.cancel();
        }
    }
}

/// Routes incoming updates to the active subscribers until the source
/// closes. Runs concurrently across workers; it is safe to drop subscriber
/// entries only when every instance has confirmed.
async fn process(shared: Arc<Shared>, input: Arc<Mutex<mpsc::Receiver<Update>>>, worker_id: usize) {
    loop {
        let update = input.lock().await.recv().await;
        let Some(update) = update else { return };
        route(&shared, worker_id, &update).await;
    }
}

async fn route(shared: &Shared, worker_id: usize, update: &Update) {
    // Snapshot the registry so no shard lock is held across an await.
    let subs: Vec<(SubKey, Arc<Subscriber>)> = shared
        .subs
        .iter()
        .map(|entry| (*entry.key(), entry.value().clone()))
        .collect();

    for (key, sub) in subs {
        // An unsubscribed entry can come around many times before the
        // other workers confirm; check before doing anything else.
        if sub.done.is_cancelled() {
            confirm_done(shared, worker_id, key, &sub);
            continue;
        }
        if !sub.matches(update) {
            continue;
        }
        // Either deliver the update or confirm the unsubscription.
        tokio::select! {
            sent = sub.tx.send(update.clone()) => {
                // A failed send means the receiver was dropped without
                // unsubscribing; the entry stays until unsubscribe or
                // shutdown removes it.
                let _ = sent;
            }
            () = sub.done.cancelled() => confirm_done(shared, worker_id, key, &sub),
        }
    }
}

fn confirm_done(shared: &Shared, worker_id: usize, key: SubKey, sub: &Subscriber) {
    if sub.done_confirmed_by[worker_id]
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        // Didn't swap, meaning this worker has already confirmed.
        return;
    }
    if sub.done_confirmed_n.fetch_add(1, Ordering::AcqRel) + 1 == shared.n_workers as u32 {
        // Final confirmation: dropping the map entry closes the stream.
        shared.subs.remove(&key);
    }
}

impl Subscriber {
    fn matches(&self, update: &Update) -> bool {
        if self.all || self.updates.contains(&update.info.kind) {
            return true;
        }
        if update.info.kind != UpdateType::Message || self.commands.is_empty() {
            return false;
        }
        match message_command(&update.content) {
            Some(cmd) => self.commands.contains(cmd.as_ref()),
            None => false,
        }
    }
}

#[derive(Deserialize)]
struct TextProbe<'a> {
    #[serde(borrow, default)]
    text: Option<Cow<'a, str>>,
}

/// Extracts the leading slash command from a message payload: characters up
/// to the first Unicode whitespace, then up to the first `@` (bot mention
/// suffix).
fn message_command(content: &RawValue) -> Option<Cow<'_, str>> {
    let text = serde_json::from_str::<TextProbe>(content.get()).ok()?.text?;
    if !text.starts_with('/') {
        return None;
    }
    let mut end = text.find(char::is_whitespace).unwrap_or(text.len());
    if let Some(at) = text[..end].find('@') {
        end = at;
    }
    Some(match text {
        Cow::Borrowed(s) => Cow::Borrowed(&s[..end]),
        Cow::Owned(mut s) => {
            s.truncate(end);
            Cow::Owned(s)
        }
    })
}
