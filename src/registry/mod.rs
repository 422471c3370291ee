use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Settings;
use crate::domain::{Event, Filter, Frame, Session, SessionsStats};
use crate::error::AppError;

/// Component F: the subscriber registry (spec 4.6). Process-local — never
/// shared across instances. The concurrent map is the only mutator of
/// session state (spec 5, "only mutator of session state"); no single lock
/// serializes every writer. Deliberately has no knowledge of the cache or
/// upstream client: fetching the resume window is the stream handler's job
/// (it calls `recent::fetch_recent` and hands the result to `replay_missed`),
/// which keeps this component testable without a live Redis or upstream.
pub struct SubscriberRegistry {
    sessions: DashMap<Uuid, Session>,
    ip_counts: DashMap<IpAddr, usize>,
    max_total: usize,
    max_per_ip: usize,
    missed_data_limit: usize,
    #[allow(dead_code)]
    write_timeout: Duration,
}

impl SubscriberRegistry {
    pub fn new(settings: &Settings) -> Self {
        Self {
            sessions: DashMap::new(),
            ip_counts: DashMap::new(),
            max_total: settings.sse_max_total,
            max_per_ip: settings.sse_max_per_ip,
            missed_data_limit: settings.sse_missed_data_limit,
            write_timeout: settings.sse_write_timeout,
        }
    }

    /// Admission + registration. The writer's "currently writable" check
    /// (spec 4.6) is satisfied by the bounded channel accepting the initial
    /// `connected` frame without blocking.
    pub fn attach(
        &self,
        ip: IpAddr,
        filter: Filter,
        resume_from_id: Option<i64>,
    ) -> Result<(Uuid, mpsc::Receiver<Frame>), AppError> {
        if self.sessions.len() >= self.max_total {
            return Err(AppError::AdmissionDenied {
                reason: "global connection limit reached".into(),
            });
        }
        let ip_count = self.ip_counts.get(&ip).map(|c| *c).unwrap_or(0);
        if ip_count >= self.max_per_ip {
            return Err(AppError::AdmissionDenied {
                reason: "per-IP connection limit reached".into(),
            });
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(256);

        if tx.try_send(Frame::connected(id)).is_err() {
            return Err(AppError::AdmissionDenied {
                reason: "writer not writable".into(),
            });
        }

        let session = Session {
            id,
            filter,
            last_event_id: resume_from_id.unwrap_or(0),
            ip,
            connected_at: Instant::now(),
            sender: tx,
            // A resume point means the caller is about to fetch and replay
            // the missed window; until that replay flushes via
            // `replay_missed`, any live broadcast must be buffered rather
            // than delivered, or it could race ahead of the replay (spec 5
            // ordering guarantees).
            replaying: resume_from_id.is_some(),
            pending_live: Vec::new(),
        };
        self.sessions.insert(id, session);
        *self.ip_counts.entry(ip).or_insert(0) += 1;

        Ok((id, rx))
    }

    pub fn detach(&self, session_id: Uuid) {
        if let Some((_, session)) = self.sessions.remove(&session_id) {
            if let Some(mut count) = self.ip_counts.get_mut(&session.ip) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    drop(count);
                    self.ip_counts.remove(&session.ip);
                }
            }
        }
    }

    /// Fans a batch of newly observed events out to every locally-attached
    /// session, ascending by `tid` (spec 4.5). A write failure — full buffer
    /// (slow consumer) or a closed channel (client gone) — drops the session
    /// rather than blocking the rest of the fan-out (spec 5).
    ///
    /// A session still waiting on its resume replay (`session.replaying`)
    /// never receives a live frame directly here: the event is buffered onto
    /// `pending_live` instead, so `replay_missed` can fold it in after the
    /// historical window, preserving ascending-`tid` delivery order.
    pub fn broadcast_local(&self, events: &[Event]) {
        let mut dead = Vec::new();

        for mut entry in self.sessions.iter_mut() {
            let session = entry.value_mut();

            if session.replaying {
                for event in events {
                    if session.wants(event) {
                        session.pending_live.push(event.clone());
                    }
                }
                continue;
            }

            for event in events {
                if !session.wants(event) {
                    continue;
                }
                if session.sender.try_send(Frame::liquidation(event)).is_err() {
                    dead.push(session.id);
                    break;
                }
                session.last_event_id = event.tid;
            }
        }

        for id in dead {
            self.detach(id);
        }
    }

    pub fn heartbeat_tick(&self) {
        let mut dead = Vec::new();
        for entry in self.sessions.iter() {
            if entry.value().sender.try_send(Frame::heartbeat()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.detach(id);
        }
    }

    pub fn stats(&self) -> SessionsStats {
        SessionsStats {
            total_connections: self.sessions.len(),
            unique_ips: self.ip_counts.len(),
        }
    }

    /// Under shutdown, every session receives a terminating control frame
    /// before the process exits (spec 4.6, "session lifecycle").
    pub fn close_all(&self, message: &str) {
        for entry in self.sessions.iter() {
            let _ = entry.value().sender.try_send(Frame::error(message));
        }
        self.sessions.clear();
        self.ip_counts.clear();
    }

    /// Resume replay (spec 4.6): caller supplies the candidate recent window
    /// (already fetched via `recent::fetch_recent`, bounded by
    /// `MISSED_DATA_LIMIT` at the call site); this keeps only events newer
    /// than the session's resume point, applies the session's filter, and
    /// delivers ascending by `tid`. Sends `truncated` instead of blocking
    /// live delivery if the missed volume exceeds the limit.
    ///
    /// Any live events `broadcast_local` buffered onto `pending_live` while
    /// this session was `replaying` are merged in here (deduped by `tid`, in
    /// case a broadcast event also appears in `candidates`) so that nothing
    /// observed during the fetch is dropped or delivered out of order. Once
    /// this flushes, `replaying` clears and later broadcasts reach the
    /// session directly again.
    pub fn replay_missed(&self, session_id: Uuid, candidates: &[Event], from_id: i64) {
        let Some(mut session) = self.sessions.get_mut(&session_id) else {
            return;
        };

        let mut by_tid: std::collections::BTreeMap<i64, Event> = std::collections::BTreeMap::new();
        for e in candidates.iter().filter(|e| e.tid > from_id) {
            by_tid.insert(e.tid, e.clone());
        }
        for e in session.pending_live.drain(..).filter(|e| e.tid > from_id) {
            by_tid.entry(e.tid).or_insert(e);
        }
        let missed: Vec<Event> = by_tid.into_values().collect();

        if missed.len() > self.missed_data_limit {
            let _ = session
                .sender
                .try_send(Frame::truncated(missed.len(), self.missed_data_limit));
        }

        for event in &missed {
            if !session.filter.matches(event) {
                continue;
            }
            if session.sender.try_send(Frame::liquidation(event)).is_err() {
                break;
            }
            session.last_event_id = session.last_event_id.max(event.tid);
        }

        session.replaying = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use chrono::Utc;

    fn event(tid: i64, coin: &str) -> Event {
        Event {
            tid,
            time: Utc::now(),
            time_ms: 0,
            coin: coin.into(),
            dir: Direction::Long,
            notional: 10.0,
            mark_price: 1.0,
            liquidated_user: "u".into(),
            liquidators: vec![],
        }
    }

    fn registry(max_total: usize, max_per_ip: usize) -> SubscriberRegistry {
        SubscriberRegistry {
            sessions: DashMap::new(),
            ip_counts: DashMap::new(),
            max_total,
            max_per_ip,
            missed_data_limit: 100,
            write_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn broadcast_local_delivers_only_newer_events_and_advances_last_event_id() {
        let reg = registry(1000, 3);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        // No resume point: this session is never `replaying`, so
        // `broadcast_local` delivers directly rather than buffering.
        let (id, mut rx) = reg.attach(ip, Filter::default(), None).unwrap();
        reg.sessions.get_mut(&id).unwrap().last_event_id = 5;
        let _ = rx.try_recv(); // drain the `connected` frame

        reg.broadcast_local(&[event(5, "BTC"), event(6, "BTC"), event(7, "ETH")]);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.id, Some(6));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.id, Some(7));
        assert_eq!(reg.sessions.get(&id).unwrap().last_event_id, 7);
    }

    #[test]
    fn broadcast_local_buffers_live_events_while_replaying_then_flushes_in_order() {
        let reg = registry(1000, 3);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let (id, mut rx) = reg.attach(ip, Filter::default(), Some(100)).unwrap();
        let _ = rx.try_recv(); // drain the `connected` frame

        // A live event arrives while the resume replay is still in flight —
        // it must be buffered, not delivered, so it can't jump ahead of the
        // historical window (spec 5 ordering guarantees, P3, S4).
        reg.broadcast_local(&[event(103, "BTC")]);
        assert!(rx.try_recv().is_err());

        reg.replay_missed(id, &[event(101, "BTC"), event(102, "BTC")], 100);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.id, Some(101));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.id, Some(102));
        let third = rx.try_recv().unwrap();
        assert_eq!(third.id, Some(103));
        assert!(rx.try_recv().is_err());
        assert!(!reg.sessions.get(&id).unwrap().replaying);
    }

    #[test]
    fn admission_enforces_total_and_per_ip_caps() {
        let reg = registry(2, 1);
        let ip_x: IpAddr = "10.0.0.1".parse().unwrap();
        let ip_y: IpAddr = "10.0.0.2".parse().unwrap();

        let (id1, _rx1) = reg
            .attach(ip_x, Filter::default(), None)
            .expect("first connection from X admitted");
        assert!(reg.attach(ip_x, Filter::default(), None).is_err());

        let (_id2, _rx2) = reg
            .attach(ip_y, Filter::default(), None)
            .expect("first connection from Y admitted");
        assert!(reg.attach(ip_y, Filter::default(), None).is_err());

        reg.detach(id1);
        assert_eq!(reg.stats().total_connections, 1);
    }

    #[test]
    fn replay_missed_filters_sorts_and_bounds_by_resume_point() {
        let reg = registry(1000, 3);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let (id, mut rx) = reg
            .attach(ip, Filter { coin: Some("BTC".into()), ..Default::default() }, Some(100))
            .unwrap();
        let _ = rx.try_recv();

        let candidates = vec![
            event(105, "BTC"),
            event(103, "ETH"),
            event(102, "BTC"),
            event(99, "BTC"),
        ];
        reg.replay_missed(id, &candidates, 100);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.id, Some(102));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.id, Some(105));
        assert!(rx.try_recv().is_err());
        assert_eq!(reg.sessions.get(&id).unwrap().last_event_id, 105);
    }
}
