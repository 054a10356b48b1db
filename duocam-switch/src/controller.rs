//! The camera switch controller: a hysteresis state machine over brightness
//! samples, with manual override, warmup gating and double-buffered frame
//! publication.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use duocam_types::{truncate_utf8, CameraId, Frame, MAX_REASON_LEN};

use crate::brightness::{BrightnessSnapshot, BrightnessStat};
use crate::config::CameraSwitchConfig;
use crate::double_buffer::{FrameDoubleBuffer, FramePublisher};
use crate::luma::{mean_luma, ImageJpegDecoder, JpegLumaDecoder};
use crate::Result;

/// What the controller wants the caller to do with the camera hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwitchDecision {
    None,
    ToNight,
    ToDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwitchMode {
    Auto,
    Manual,
}

/// Read-only diagnostics snapshot of a controller.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub mode: SwitchMode,
    pub active_camera: CameraId,
    /// Pinned camera, meaningful only in [SwitchMode::Manual].
    pub manual_target: Option<CameraId>,
    pub day: BrightnessSnapshot,
    pub night: BrightnessSnapshot,
    pub last_switch_reason: String,
    pub warmup_remaining: u32,
}

/// Owns the switching policy and all per-pair state: mode, active camera,
/// hysteresis timers, per-camera brightness statistics and the outgoing
/// frame double buffer.
///
/// One instance per camera pair, driven by a single capture-loop thread. The
/// controller performs no internal threading and must not be shared across
/// threads without external synchronization.
///
/// Timing-sensitive operations take `now` on the monotonic clock via their
/// `_at` forms; the plain forms use [Instant::now]. Samples for the
/// non-active (probe) camera update its statistic so a reading is ready for
/// the camera the controller might switch to next, but never themselves
/// trigger a decision.
pub struct CameraSwitchController {
    config: CameraSwitchConfig,
    mode: SwitchMode,
    active_camera: CameraId,
    manual_target: CameraId,
    /// Start of the continuous below-threshold streak while day is active.
    /// `None` means not currently accumulating.
    below_threshold_since: Option<Instant>,
    /// Start of the continuous above-threshold streak while night is active.
    above_threshold_since: Option<Instant>,
    brightness: [BrightnessStat; 2],
    last_switch_reason: String,
    double_buffer: FrameDoubleBuffer,
    jpeg_decoder: Box<dyn JpegLumaDecoder>,
}

impl CameraSwitchController {
    pub fn new(config: CameraSwitchConfig) -> Self {
        Self {
            config,
            mode: SwitchMode::Auto,
            active_camera: CameraId::Day,
            manual_target: CameraId::Day,
            below_threshold_since: None,
            above_threshold_since: None,
            brightness: [BrightnessStat::default(); 2],
            last_switch_reason: String::new(),
            double_buffer: FrameDoubleBuffer::new(),
            jpeg_decoder: Box::new(ImageJpegDecoder),
        }
    }

    /// Replace the JPEG luma collaborator (e.g. a hardware decoder).
    pub fn with_jpeg_decoder(mut self, decoder: Box<dyn JpegLumaDecoder>) -> Self {
        self.jpeg_decoder = decoder;
        self
    }

    pub fn config(&self) -> &CameraSwitchConfig {
        &self.config
    }

    pub fn mode(&self) -> SwitchMode {
        self.mode
    }

    pub fn active_camera(&self) -> CameraId {
        self.active_camera
    }

    /// Pin the controller to `camera`. No decisions are produced until
    /// [CameraSwitchController::resume_auto], though brightness is still
    /// recorded for telemetry.
    pub fn force_manual(&mut self, camera: CameraId) {
        self.mode = SwitchMode::Manual;
        self.manual_target = camera;
        info!("manual mode: pinned to {} camera", camera);
    }

    /// Return to automatic switching. The hysteresis timers restart from a
    /// clean state rather than acting on whatever they accumulated before or
    /// during manual mode.
    pub fn resume_auto(&mut self) {
        self.mode = SwitchMode::Auto;
        self.below_threshold_since = None;
        self.above_threshold_since = None;
        info!("auto mode resumed");
    }

    /// Record a brightness sample using the current time.
    pub fn record_brightness(&mut self, camera: CameraId, value: f64) -> SwitchDecision {
        self.record_brightness_at(camera, value, Instant::now())
    }

    /// Record a brightness sample for `camera` at monotonic time `now` and
    /// evaluate the hysteresis rules.
    ///
    /// The statistic is always updated. A decision can only come from a
    /// sample for the active camera in auto mode, and only after the
    /// threshold condition has held *continuously* for the configured hold:
    /// a single contrary reading cancels an in-progress switch. Emitting a
    /// decision re-arms the timer, so without an intervening
    /// [CameraSwitchController::notify_active_camera] the same decision
    /// re-fires only after another full hold period.
    pub fn record_brightness_at(
        &mut self,
        camera: CameraId,
        value: f64,
        now: Instant,
    ) -> SwitchDecision {
        self.brightness[camera.index()].update(value, now);
        if self.mode == SwitchMode::Manual || camera != self.active_camera {
            return SwitchDecision::None;
        }
        let avg = self.brightness[camera.index()].avg;
        match self.active_camera {
            CameraId::Day => {
                // The streak requires both the instantaneous sample and the
                // smoothed mean below threshold; either one recovering
                // cancels the pending switch.
                let below =
                    value < self.config.day_to_night_threshold && avg < self.config.day_to_night_threshold;
                if !below {
                    self.below_threshold_since = None;
                    return SwitchDecision::None;
                }
                match self.below_threshold_since {
                    None => {
                        self.below_threshold_since = Some(now);
                        debug!("day camera dimming (avg {avg:.1}), hold timer started");
                    }
                    Some(since) => {
                        if now.duration_since(since) >= self.config.day_to_night_hold() {
                            self.below_threshold_since = None;
                            info!(
                                "brightness below {} for {:?}: requesting switch to night",
                                self.config.day_to_night_threshold,
                                self.config.day_to_night_hold()
                            );
                            return SwitchDecision::ToNight;
                        }
                    }
                }
            }
            CameraId::Night => {
                let above = value > self.config.night_to_day_threshold
                    && avg > self.config.night_to_day_threshold;
                if !above {
                    self.above_threshold_since = None;
                    return SwitchDecision::None;
                }
                match self.above_threshold_since {
                    None => {
                        self.above_threshold_since = Some(now);
                        debug!("night camera brightening (avg {avg:.1}), hold timer started");
                    }
                    Some(since) => {
                        if now.duration_since(since) >= self.config.night_to_day_hold() {
                            self.above_threshold_since = None;
                            info!(
                                "brightness above {} for {:?}: requesting switch to day",
                                self.config.night_to_day_threshold,
                                self.config.night_to_day_hold()
                            );
                            return SwitchDecision::ToDay;
                        }
                    }
                }
            }
        }
        SwitchDecision::None
    }

    /// The caller has physically reconfigured the hardware to `camera`.
    ///
    /// Resets both hysteresis timers, arms warmup-frame gating and
    /// invalidates the double buffer's publishable slot so the next
    /// published frame is the first post-switch frame.
    pub fn notify_active_camera(&mut self, camera: CameraId, reason: &str) {
        self.active_camera = camera;
        self.below_threshold_since = None;
        self.above_threshold_since = None;
        self.double_buffer.reset_for_switch(self.config.warmup_frames);
        self.last_switch_reason = truncate_utf8(reason, MAX_REASON_LEN).to_string();
        info!(
            "active camera now {} ({}), dropping {} warmup frames",
            camera, self.last_switch_reason, self.config.warmup_frames
        );
    }

    /// Feed one captured frame through brightness tracking and, for the
    /// active camera, publication, using the current time.
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        camera: CameraId,
        is_active: bool,
        publisher: Option<&mut dyn FramePublisher>,
    ) -> SwitchDecision {
        self.handle_frame_at(frame, camera, is_active, publisher, Instant::now())
    }

    /// Like [CameraSwitchController::handle_frame] with an explicit clock.
    ///
    /// A frame whose luma cannot be computed contributes no brightness
    /// sample and is not published. Publication failures are logged but
    /// never suppress the switch decision.
    pub fn handle_frame_at(
        &mut self,
        frame: &Frame,
        camera: CameraId,
        is_active: bool,
        publisher: Option<&mut dyn FramePublisher>,
        now: Instant,
    ) -> SwitchDecision {
        let luma = match mean_luma(frame, self.jpeg_decoder.as_ref()) {
            Ok(luma) => luma,
            Err(e) => {
                debug!(
                    "dropping sample from {} camera frame {}: {}",
                    camera, frame.frame_number, e
                );
                return SwitchDecision::None;
            }
        };
        let decision = self.record_brightness_at(camera, luma, now);
        if is_active {
            if let Err(e) = self.publish_frame(frame, publisher) {
                warn!("publishing frame {} failed: {}", frame.frame_number, e);
            }
        }
        decision
    }

    /// Publish `frame` through the double buffer (see [FrameDoubleBuffer]).
    pub fn publish_frame(
        &mut self,
        frame: &Frame,
        publisher: Option<&mut dyn FramePublisher>,
    ) -> Result<()> {
        self.double_buffer.publish(frame, publisher)
    }

    /// The staged frame currently safe to expose, if any.
    pub fn active_frame(&self) -> Option<&Frame> {
        self.double_buffer.active_frame()
    }

    /// Diagnostics snapshot using the current time.
    pub fn status(&self) -> ControllerStatus {
        self.status_at(Instant::now())
    }

    /// Diagnostics snapshot; never mutates controller state.
    pub fn status_at(&self, now: Instant) -> ControllerStatus {
        ControllerStatus {
            mode: self.mode,
            active_camera: self.active_camera,
            manual_target: match self.mode {
                SwitchMode::Manual => Some(self.manual_target),
                SwitchMode::Auto => None,
            },
            day: self.brightness[CameraId::Day.index()].snapshot(now),
            night: self.brightness[CameraId::Night.index()].snapshot(now),
            last_switch_reason: self.last_switch_reason.clone(),
            warmup_remaining: self.double_buffer.warmup_remaining(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::double_buffer::PublishError;
    use duocam_types::FrameFormat;
    use std::time::Duration;

    fn config() -> CameraSwitchConfig {
        CameraSwitchConfig {
            day_to_night_threshold: 50.0,
            night_to_day_threshold: 50.0,
            day_to_night_hold_seconds: 2.0,
            night_to_day_hold_seconds: 2.0,
            warmup_frames: 3,
        }
    }

    fn at(t0: Instant, millis: u64) -> Instant {
        t0 + Duration::from_millis(millis)
    }

    /// An RGB frame of uniform gray so mean luma == the gray level.
    fn gray_frame(camera: CameraId, frame_number: u64, level: u8) -> Box<Frame> {
        let (w, h) = (4u32, 2u32);
        let mut frame = Frame::boxed();
        frame.frame_number = frame_number;
        frame.camera_id = camera as u32;
        frame.width = w;
        frame.height = h;
        frame.format = FrameFormat::Rgb as u32;
        frame.set_data(&vec![level; (w * h * 3) as usize]).unwrap();
        frame
    }

    #[test]
    fn switch_requires_continuous_hold() {
        let mut ctrl = CameraSwitchController::new(config());
        let t0 = Instant::now();
        for millis in [0, 500, 1000, 1500, 1999] {
            assert_eq!(
                ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, millis)),
                SwitchDecision::None,
                "at {millis}ms"
            );
        }
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 2000)),
            SwitchDecision::ToNight
        );
    }

    #[test]
    fn bright_sample_resets_the_hold_timer() {
        let mut ctrl = CameraSwitchController::new(config());
        let t0 = Instant::now();
        ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 0));
        ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 1000));
        // one good reading cancels the in-progress switch
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 60.0, at(t0, 1500)),
            SwitchDecision::None
        );
        // elapsed-below time restarts from zero afterward
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 2000)),
            SwitchDecision::None
        );
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 3500)),
            SwitchDecision::None
        );
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 4000)),
            SwitchDecision::ToNight
        );
    }

    #[test]
    fn decision_fires_once_then_rearms() {
        let mut ctrl = CameraSwitchController::new(config());
        let t0 = Instant::now();
        ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 0));
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 2000)),
            SwitchDecision::ToNight
        );
        // without notify_active_camera the decision must not repeat until a
        // fresh full hold has elapsed
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 2500)),
            SwitchDecision::None
        );
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 4000)),
            SwitchDecision::None
        );
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 4500)),
            SwitchDecision::ToNight
        );
    }

    #[test]
    fn night_to_day_is_symmetric() {
        let mut ctrl = CameraSwitchController::new(config());
        let t0 = Instant::now();
        ctrl.notify_active_camera(CameraId::Night, "nightfall");
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Night, 80.0, at(t0, 0)),
            SwitchDecision::None
        );
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Night, 80.0, at(t0, 2000)),
            SwitchDecision::ToDay
        );
    }

    #[test]
    fn probe_camera_samples_never_decide() {
        let mut ctrl = CameraSwitchController::new(config());
        let t0 = Instant::now();
        // active camera is day; night samples satisfy every night->day rule
        for millis in [0, 1000, 2000, 3000, 4000] {
            assert_eq!(
                ctrl.record_brightness_at(CameraId::Night, 90.0, at(t0, millis)),
                SwitchDecision::None
            );
        }
        // but the probe statistic is maintained
        let status = ctrl.status_at(at(t0, 4000));
        assert_eq!(status.night.samples, 5);
        assert_eq!(status.night.avg, 90.0);
    }

    #[test]
    fn manual_mode_suppresses_decisions() {
        let mut ctrl = CameraSwitchController::new(config());
        let t0 = Instant::now();
        ctrl.force_manual(CameraId::Day);
        for millis in [0, 1000, 2000, 3000, 4000] {
            assert_eq!(
                ctrl.record_brightness_at(CameraId::Day, 10.0, at(t0, millis)),
                SwitchDecision::None
            );
        }
        // telemetry still recorded
        assert_eq!(ctrl.status_at(at(t0, 4000)).day.samples, 5);

        // resume re-arms from a clean timer: no instant decision from the
        // long dark streak above
        ctrl.resume_auto();
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 10.0, at(t0, 5000)),
            SwitchDecision::None
        );
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Day, 10.0, at(t0, 7000)),
            SwitchDecision::ToNight
        );
    }

    #[test]
    fn notify_resets_timers_and_records_reason() {
        let mut ctrl = CameraSwitchController::new(config());
        let t0 = Instant::now();
        ctrl.record_brightness_at(CameraId::Day, 30.0, at(t0, 0));
        ctrl.notify_active_camera(CameraId::Night, "dusk: luma below 50");
        // old accumulation is gone; night rules start fresh
        assert_eq!(
            ctrl.record_brightness_at(CameraId::Night, 80.0, at(t0, 2500)),
            SwitchDecision::None
        );
        let status = ctrl.status_at(at(t0, 2500));
        assert_eq!(status.active_camera, CameraId::Night);
        assert_eq!(status.last_switch_reason, "dusk: luma below 50");
        assert_eq!(status.warmup_remaining, 3);
    }

    #[test]
    fn long_reason_is_truncated() {
        let mut ctrl = CameraSwitchController::new(config());
        let long = "x".repeat(500);
        ctrl.notify_active_camera(CameraId::Night, &long);
        assert_eq!(
            ctrl.status().last_switch_reason.len(),
            duocam_types::MAX_REASON_LEN
        );
    }

    #[test]
    fn handle_frame_publishes_active_camera_only() {
        let mut ctrl = CameraSwitchController::new(CameraSwitchConfig {
            warmup_frames: 0,
            ..config()
        });
        let t0 = Instant::now();
        let mut published: Vec<u64> = Vec::new();
        let frame = gray_frame(CameraId::Day, 1, 100);
        {
            let mut publisher = |f: &Frame| -> std::result::Result<(), PublishError> {
                published.push(f.frame_number);
                Ok(())
            };
            ctrl.handle_frame_at(&frame, CameraId::Day, true, Some(&mut publisher), t0);
            let probe = gray_frame(CameraId::Night, 2, 100);
            ctrl.handle_frame_at(&probe, CameraId::Night, false, Some(&mut publisher), t0);
        }
        assert_eq!(published, vec![1]);
        // both cameras got a brightness sample out of their frames
        let status = ctrl.status_at(t0);
        assert_eq!(status.day.samples, 1);
        assert_eq!(status.night.samples, 1);
        assert!((status.day.latest_value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_frame_contributes_nothing() {
        let mut ctrl = CameraSwitchController::new(config());
        let t0 = Instant::now();
        let mut frame = gray_frame(CameraId::Day, 1, 100);
        frame.format = 7;
        let mut published = 0u32;
        let mut publisher = |_: &Frame| -> std::result::Result<(), PublishError> {
            published += 1;
            Ok(())
        };
        let decision =
            ctrl.handle_frame_at(&frame, CameraId::Day, true, Some(&mut publisher), t0);
        assert_eq!(decision, SwitchDecision::None);
        assert_eq!(published, 0);
        assert_eq!(ctrl.status_at(t0).day.samples, 0);
    }

    #[test]
    fn publish_failure_does_not_suppress_decision() {
        let mut ctrl = CameraSwitchController::new(CameraSwitchConfig {
            warmup_frames: 0,
            ..config()
        });
        let t0 = Instant::now();
        let dark = gray_frame(CameraId::Day, 1, 20);
        let mut failing = |_: &Frame| -> std::result::Result<(), PublishError> {
            Err(PublishError::Downstream("encoder timeout".to_string()))
        };
        assert_eq!(
            ctrl.handle_frame_at(&dark, CameraId::Day, true, Some(&mut failing), t0),
            SwitchDecision::None
        );
        assert_eq!(
            ctrl.handle_frame_at(&dark, CameraId::Day, true, Some(&mut failing), at(t0, 2000)),
            SwitchDecision::ToNight
        );
    }

    #[test]
    fn warmup_after_notify_gates_publication() {
        let mut ctrl = CameraSwitchController::new(config());
        ctrl.notify_active_camera(CameraId::Night, "test switch");
        let mut published: Vec<u64> = Vec::new();
        for i in 0..4u64 {
            let frame = gray_frame(CameraId::Night, i, 100);
            let mut publisher = |f: &Frame| -> std::result::Result<(), PublishError> {
                published.push(f.frame_number);
                Ok(())
            };
            ctrl.publish_frame(&frame, Some(&mut publisher)).unwrap();
        }
        // warmup_frames = 3: frames 0..2 dropped, frame 3 published once
        assert_eq!(published, vec![3]);
        assert_eq!(ctrl.active_frame().unwrap().frame_number, 3);
    }
}
