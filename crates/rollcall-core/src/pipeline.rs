//! Per-frame recognition and attendance pipeline.
//!
//! For each frame: downsample, detect and embed, match every face against
//! the gallery, gate matched names through the cooldown tracker, append a
//! ledger row for those that pass, and return annotations scaled back to the
//! source resolution. Nothing is carried between frames except the cooldown
//! map; detections are recomputed from scratch every time.
//!
//! The orchestrator is single-threaded. Callers that feed it from several
//! threads must hold the orchestrator and its ledger under one lock, since
//! the cooldown check and the ledger append form a check-then-act sequence.

use crate::cooldown::CooldownTracker;
use crate::embedder::{EmbedError, FaceEmbedder};
use crate::frame::{Frame, FrameSource};
use crate::ledger::{AttendanceRecord, Ledger, LedgerError};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::types::{Annotation, Gallery};
use chrono::NaiveDateTime;
use std::ops::ControlFlow;
use thiserror::Error;

/// Detection runs on frames shrunk by this factor on each axis.
pub const DOWNSAMPLE_SCALE: f32 = 0.25;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detection failed: {0}")]
    Embed(#[from] EmbedError),
    #[error("attendance write failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// Output of one pipeline step: the untouched source frame plus what to draw on it.
#[derive(Debug)]
pub struct FrameOutput<'f> {
    pub frame: &'f Frame,
    pub annotations: Vec<Annotation>,
    /// Rows appended to the ledger during this frame.
    pub records: Vec<AttendanceRecord>,
    /// Orchestrator counters after this frame.
    pub stats: PipelineStats,
}

/// Counters since the orchestrator was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub faces: u64,
    pub records: u64,
}

pub struct Orchestrator<E, M = EuclideanMatcher> {
    embedder: E,
    matcher: M,
    gallery: Gallery,
    tolerance: f32,
    cooldown: CooldownTracker,
    scale: f32,
    stats: PipelineStats,
}

impl<E: FaceEmbedder> Orchestrator<E, EuclideanMatcher> {
    pub fn new(gallery: Gallery, embedder: E, tolerance: f32, cooldown: CooldownTracker) -> Self {
        Self::with_matcher(gallery, embedder, EuclideanMatcher, tolerance, cooldown)
    }
}

impl<E: FaceEmbedder, M: Matcher> Orchestrator<E, M> {
    pub fn with_matcher(
        gallery: Gallery,
        embedder: E,
        matcher: M,
        tolerance: f32,
        cooldown: CooldownTracker,
    ) -> Self {
        Self {
            embedder,
            matcher,
            gallery,
            tolerance,
            cooldown,
            scale: DOWNSAMPLE_SCALE,
            stats: PipelineStats::default(),
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Run one frame through the pipeline at wall-clock time `now`.
    ///
    /// Faces are handled in detection order. A name that passes the cooldown
    /// check is written to `ledger` and recorded before the next face is
    /// checked, so duplicate boxes for one person in a frame produce one row.
    /// A ledger failure aborts the frame and is returned to the caller.
    pub fn process_frame<'f>(
        &mut self,
        frame: &'f Frame,
        now: NaiveDateTime,
        ledger: &mut Ledger,
    ) -> Result<FrameOutput<'f>, PipelineError> {
        let small = frame.downsample(self.scale);
        let detections = self.embedder.detect_and_embed(&small)?;
        self.stats.frames += 1;
        self.stats.faces += detections.len() as u64;

        let from = (small.width, small.height);
        let to = (frame.width, frame.height);
        let mut annotations = Vec::with_capacity(detections.len());
        let mut records = Vec::new();

        for detection in detections {
            let result = self
                .matcher
                .compare(&detection.embedding, &self.gallery, self.tolerance);

            let mut logged = false;
            if let Some(name) = result.name.as_deref() {
                if self.cooldown.should_log(name, now) {
                    let record = AttendanceRecord::present(name, now);
                    ledger.append(&record)?;
                    self.cooldown.record(name, now);
                    self.stats.records += 1;
                    tracing::info!(name, timestamp = %record.timestamp_string(), "attendance logged");
                    records.push(record);
                    logged = true;
                }
            }

            annotations.push(Annotation {
                face_box: detection.face_box.rescaled(from, to),
                label: result.label().to_string(),
                distance: result.distance,
                logged,
            });
        }

        tracing::debug!(
            seq = frame.sequence,
            faces = annotations.len(),
            logged = records.len(),
            "frame processed"
        );

        Ok(FrameOutput {
            frame,
            annotations,
            records,
            stats: self.stats,
        })
    }

    /// Pull frames from `source` until it ends or `sink` breaks.
    ///
    /// `clock` is sampled once per frame. Returns the number of frames processed.
    pub fn drive<S, C, F>(
        &mut self,
        source: &mut S,
        ledger: &mut Ledger,
        mut clock: C,
        mut sink: F,
    ) -> Result<u64, PipelineError>
    where
        S: FrameSource + ?Sized,
        C: FnMut() -> NaiveDateTime,
        F: FnMut(FrameOutput<'_>) -> ControlFlow<()>,
    {
        let mut count = 0u64;
        while let Some(frame) = source.next_frame() {
            let output = self.process_frame(&frame, clock(), ledger)?;
            count += 1;
            if sink(output).is_break() {
                break;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ledger_path, read_records};
    use crate::types::{Detection, Embedding, FaceBox, Identity};
    use chrono::{NaiveDate, TimeDelta};
    use std::collections::VecDeque;

    /// Returns a scripted detection list per call, in order.
    struct ScriptedEmbedder {
        script: VecDeque<Vec<Detection>>,
        seen_sizes: Vec<(u32, u32)>,
    }

    impl ScriptedEmbedder {
        fn new(script: Vec<Vec<Detection>>) -> Self {
            Self {
                script: script.into(),
                seen_sizes: Vec::new(),
            }
        }
    }

    impl FaceEmbedder for ScriptedEmbedder {
        fn detect_and_embed(&mut self, frame: &Frame) -> Result<Vec<Detection>, EmbedError> {
            self.seen_sizes.push((frame.width, frame.height));
            Ok(self.script.pop_front().unwrap_or_default())
        }
    }

    struct FailingEmbedder;

    impl FaceEmbedder for FailingEmbedder {
        fn detect_and_embed(&mut self, _frame: &Frame) -> Result<Vec<Detection>, EmbedError> {
            Err(EmbedError::Model("session lost".into()))
        }
    }

    struct FixedSource {
        remaining: usize,
    }

    impl FrameSource for FixedSource {
        fn next_frame(&mut self) -> Option<Frame> {
            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            Some(source_frame())
        }
    }

    const E1: [f32; 3] = [1.0, 0.0, 0.0];

    fn near_e1() -> Detection {
        face(FaceBox::new(10, 40, 30, 20), vec![0.98, 0.05, 0.0])
    }

    fn stranger() -> Detection {
        face(FaceBox::new(50, 90, 70, 60), vec![-1.0, 3.0, 2.0])
    }

    fn face(face_box: FaceBox, values: Vec<f32>) -> Detection {
        Detection {
            face_box,
            embedding: Embedding::new(values),
        }
    }

    fn alice_gallery() -> Gallery {
        Gallery::new(vec![Identity {
            name: "alice".into(),
            embedding: Embedding::new(E1.to_vec()),
        }])
        .unwrap()
    }

    fn source_frame() -> Frame {
        Frame::new(vec![128u8; 640 * 480], 640, 480)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn at(secs: i64) -> NaiveDateTime {
        date().and_hms_opt(9, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn orchestrator(script: Vec<Vec<Detection>>) -> Orchestrator<ScriptedEmbedder> {
        Orchestrator::new(
            alice_gallery(),
            ScriptedEmbedder::new(script),
            0.6,
            CooldownTracker::from_secs(10),
        )
    }

    #[test]
    fn test_cooldown_scenario_three_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        let mut pipeline = orchestrator(vec![vec![near_e1()], vec![near_e1()], vec![near_e1()]]);
        let frame = source_frame();

        let out = pipeline.process_frame(&frame, at(0), &mut ledger).unwrap();
        assert_eq!(out.records, vec![AttendanceRecord::present("alice", at(0))]);
        let out = pipeline.process_frame(&frame, at(5), &mut ledger).unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.annotations[0].label, "alice");
        assert!(!out.annotations[0].logged);
        let out = pipeline.process_frame(&frame, at(15), &mut ledger).unwrap();
        assert_eq!(out.records, vec![AttendanceRecord::present("alice", at(15))]);
        assert_eq!(out.stats, pipeline.stats());
        ledger.close().unwrap();

        let rows = read_records(&ledger_path(dir.path(), date())).unwrap();
        assert_eq!(
            rows,
            vec![
                AttendanceRecord::present("alice", at(0)),
                AttendanceRecord::present("alice", at(15)),
            ]
        );
        assert_eq!(
            pipeline.stats(),
            PipelineStats {
                frames: 3,
                faces: 3,
                records: 2
            }
        );
    }

    #[test]
    fn test_known_and_unknown_in_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        let mut pipeline = orchestrator(vec![vec![near_e1(), stranger()]]);
        let frame = source_frame();

        let out = pipeline.process_frame(&frame, at(0), &mut ledger).unwrap();
        let labels: Vec<_> = out.annotations.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, ["alice", "Unknown"]);
        assert_eq!(out.records.len(), 1);
        assert!(out.annotations[0].logged);
        assert!(!out.annotations[1].logged);
        ledger.close().unwrap();

        let rows = read_records(&ledger_path(dir.path(), date())).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "alice");
    }

    #[test]
    fn test_duplicate_boxes_log_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        let mut pipeline = orchestrator(vec![vec![near_e1(), near_e1()]]);
        let frame = source_frame();

        let out = pipeline.process_frame(&frame, at(0), &mut ledger).unwrap();
        assert_eq!(out.annotations.len(), 2);
        assert_eq!(out.records.len(), 1);
        assert_eq!(ledger.rows_written(), 1);
    }

    #[test]
    fn test_detection_runs_on_downsampled_frame_and_boxes_scale_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        let mut pipeline = orchestrator(vec![vec![near_e1()]]);
        let frame = source_frame();

        let out = pipeline.process_frame(&frame, at(0), &mut ledger).unwrap();
        assert_eq!(out.annotations[0].face_box, FaceBox::new(40, 160, 120, 80));
        assert_eq!(out.frame.width, 640);
        assert_eq!(pipeline.embedder.seen_sizes, vec![(160, 120)]);
    }

    #[test]
    fn test_odd_sized_frame_boxes_stay_inside_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        let corner = face(FaceBox::new(100, 161, 121, 120), E1.to_vec());
        let mut pipeline = orchestrator(vec![vec![corner]]);
        let frame = Frame::new(vec![128u8; 642 * 482], 642, 482);

        let out = pipeline.process_frame(&frame, at(0), &mut ledger).unwrap();
        assert_eq!(pipeline.embedder.seen_sizes, vec![(161, 121)]);
        let b = out.annotations[0].face_box;
        assert_eq!((b.right, b.bottom), (642, 482));
    }

    #[test]
    fn test_undersized_buffer_keeps_boxes_at_source_scale() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        let mut pipeline = orchestrator(vec![vec![near_e1()]]);
        let frame = Frame::new(vec![128u8; 16], 640, 480);

        let out = pipeline.process_frame(&frame, at(0), &mut ledger).unwrap();
        assert_eq!(pipeline.embedder.seen_sizes, vec![(640, 480)]);
        assert_eq!(out.annotations[0].face_box, FaceBox::new(10, 40, 30, 20));
    }

    #[test]
    fn test_no_faces_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        let mut pipeline = orchestrator(vec![vec![]]);
        let frame = source_frame();

        let out = pipeline.process_frame(&frame, at(0), &mut ledger).unwrap();
        assert!(out.annotations.is_empty());
        assert_eq!(ledger.rows_written(), 0);
    }

    #[test]
    fn test_embed_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        let mut pipeline = Orchestrator::new(
            alice_gallery(),
            FailingEmbedder,
            0.6,
            CooldownTracker::from_secs(10),
        );
        let frame = source_frame();
        let err = pipeline
            .process_frame(&frame, at(0), &mut ledger)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Embed(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_ledger_write_failure_surfaces_and_leaves_cooldown_unset() {
        let full = std::fs::OpenOptions::new()
            .append(true)
            .open("/dev/full")
            .unwrap();
        let mut broken = Ledger::from_file("/dev/full".into(), full);
        let mut pipeline = orchestrator(vec![vec![near_e1()], vec![near_e1()]]);
        let frame = source_frame();

        let err = pipeline
            .process_frame(&frame, at(0), &mut broken)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Ledger(LedgerError::Io { .. })));
        assert_eq!(pipeline.cooldown().last_logged("alice"), None);
        assert_eq!(broken.rows_written(), 0);

        // Retried on the next frame once the ledger is writable again.
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        let out = pipeline.process_frame(&frame, at(1), &mut ledger).unwrap();
        assert_eq!(out.records, vec![AttendanceRecord::present("alice", at(1))]);
        assert_eq!(pipeline.cooldown().last_logged("alice"), Some(at(1)));
    }

    #[test]
    fn test_drive_until_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = orchestrator(vec![vec![near_e1()], vec![near_e1()], vec![near_e1()]]);
        let mut source = FixedSource { remaining: 3 };
        let mut t = -6;
        let mut annotated = 0;

        let frames = Ledger::scoped(dir.path(), date(), |ledger| {
            pipeline.drive(
                &mut source,
                ledger,
                || {
                    t += 6;
                    at(t)
                },
                |out| {
                    annotated += out.annotations.len();
                    ControlFlow::Continue(())
                },
            )
        })
        .unwrap();

        assert_eq!(frames, 3);
        assert_eq!(annotated, 3);
        // t = 0, 6, 12: logged at 0 and 12.
        let rows = read_records(&ledger_path(dir.path(), date())).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].timestamp, at(12));
    }

    #[test]
    fn test_drive_stops_when_sink_breaks() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), date()).unwrap();
        let mut pipeline = orchestrator(Vec::new());
        let mut source = FixedSource { remaining: 10 };

        let frames = pipeline
            .drive(&mut source, &mut ledger, || at(0), |_| ControlFlow::Break(()))
            .unwrap();
        assert_eq!(frames, 1);
        assert_eq!(source.remaining, 9);
    }
}
