//! Rigid-body pose snapshots for consumers outside the frame loop.
//!
//! A consumer asks for a snapshot and gets a [`Receiver`]. The scheduler
//! answers every pending request at the end of the next frame, after all
//! dispatches of that frame have finished, so a snapshot never shows a
//! half-updated state. Dropped receivers are skipped.

use std::sync::mpsc::{channel, Receiver, Sender};

use glam::Vec2;

use crate::rigid::{RbData, RigidBody};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyPose {
    pub pos: Vec2,
    pub rotation: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PoseSnapshot {
    /// Total sub-steps simulated when the snapshot was taken.
    pub step: u64,
    pub sim_time: f32,
    pub poses: Vec<BodyPose>,
}

impl PoseSnapshot {
    pub fn from_bodies(bodies: &[RigidBody], step: u64, sim_time: f32) -> Self {
        let poses = bodies.iter().map(|b| BodyPose { pos: b.pos, rotation: b.rotation }).collect();
        Self { step, sim_time, poses }
    }

    /// Decode from read-back GPU records.
    pub fn from_wire(records: &[RbData], step: u64, sim_time: f32) -> Self {
        let poses = records.iter().map(|r| BodyPose { pos: r.pos, rotation: r.tot_rot }).collect();
        Self { step, sim_time, poses }
    }
}

/// Outstanding snapshot requests.
#[derive(Debug, Default)]
pub struct PoseRequests {
    pending: Vec<Sender<PoseSnapshot>>,
}

impl PoseRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self) -> Receiver<PoseSnapshot> {
        let (tx, rx) = channel();
        self.pending.push(tx);
        rx
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Send `snapshot` to every waiting requester. Returns how many received it.
    pub fn fulfil(&mut self, snapshot: &PoseSnapshot) -> usize {
        self.pending.drain(..).filter(|tx| tx.send(snapshot.clone()).is_ok()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_answered_once() {
        let mut requests = PoseRequests::new();
        let rx = requests.request();
        let dropped = requests.request();
        drop(dropped);
        assert_eq!(requests.pending(), 2);

        let snapshot = PoseSnapshot { step: 9, sim_time: 0.5, poses: vec![BodyPose { pos: Vec2::ONE, rotation: 0.25 }] };
        assert_eq!(requests.fulfil(&snapshot), 1);
        assert_eq!(requests.pending(), 0);
        assert_eq!(rx.recv().unwrap(), snapshot);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_wire_decode() {
        let record = RbData { pos: Vec2::new(3.0, 4.0), tot_rot: 1.5, ..Default::default() };
        let snapshot = PoseSnapshot::from_wire(&[record], 1, 0.1);
        assert_eq!(snapshot.poses[0], BodyPose { pos: Vec2::new(3.0, 4.0), rotation: 1.5 });
    }
}
