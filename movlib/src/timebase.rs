//! Time bases and time conversion.
//!
//! A `TimeBase` is a shared clock handle: it has a rate, a settable
//! current time, optional start/stop bounds, and optionally a master
//! time base it is slaved to. The effective rate of a base is the
//! product of the rates along its master chain.
//!
use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use crate::types::{TimeRecord, TimeScale, TimeValue64};

/// Rescale `value` from one time scale to another, rounding to the
/// nearest unit, ties away from zero.
pub fn rescale(value: i64, from: TimeScale, to: TimeScale) -> i64 {
    if from == to || from == 0 {
        return value;
    }
    let num = value as i128 * to as i128;
    let den = from as i128;
    let half = den / 2;
    let rounded = if num >= 0 { (num + half) / den } else { (num - half) / den };
    rounded as i64
}

/// Re-express a time record in a different time scale, rounding to
/// the nearest unit.
pub fn convert_time_scale(record: &mut TimeRecord, scale: TimeScale) {
    record.value = rescale(record.value, record.scale, scale);
    record.scale = scale;
}

struct Inner {
    scale:  TimeScale,
    rate:   f64,
    time:   TimeValue64,
    start:  Option<TimeValue64>,
    stop:   Option<TimeValue64>,
    master: Option<TimeBase>,
    thread: Option<ThreadId>,
}

/// Shared clock handle. Clones refer to the same clock.
#[derive(Clone)]
pub struct TimeBase {
    inner: Arc<Mutex<Inner>>,
}

impl TimeBase {
    /// New time base with rate 1 at time 0.
    pub fn new(scale: TimeScale) -> TimeBase {
        TimeBase {
            inner: Arc::new(Mutex::new(Inner {
                scale,
                rate: 1.0,
                time: 0,
                start: None,
                stop: None,
                master: None,
                thread: None,
            })),
        }
    }

    /// Do two handles refer to the same clock?
    pub fn same_clock(&self, other: &TimeBase) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned timebase lock means a panic elsewhere; the state
        // itself is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_thread(inner: &Inner) -> io::Result<()> {
        if let Some(thread) = inner.thread {
            if thread != thread::current().id() {
                return Err(ioerr!(WouldBlock, "timebase is attached to another thread"));
            }
        }
        Ok(())
    }

    /// Restrict mutations to the current thread.
    pub fn attach_to_current_thread(&self) -> io::Result<()> {
        let mut inner = self.lock();
        TimeBase::check_thread(&inner)?;
        inner.thread = Some(thread::current().id());
        Ok(())
    }

    /// Remove the thread restriction so another thread can attach.
    pub fn detach_from_thread(&self) -> io::Result<()> {
        let mut inner = self.lock();
        TimeBase::check_thread(&inner)?;
        inner.thread = None;
        Ok(())
    }

    pub fn time_scale(&self) -> TimeScale {
        self.lock().scale
    }

    /// The base's own rate.
    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    pub fn set_rate(&self, rate: f64) -> io::Result<()> {
        let mut inner = self.lock();
        TimeBase::check_thread(&inner)?;
        inner.rate = rate;
        Ok(())
    }

    /// The product of the rates along the master chain.
    pub fn effective_rate(&self) -> f64 {
        let inner = self.lock();
        let mut rate = inner.rate;
        let mut master = inner.master.clone();
        drop(inner);
        while let Some(tb) = master {
            let m = tb.lock();
            rate *= m.rate;
            master = m.master.clone();
        }
        rate
    }

    /// Current time, clamped to the start/stop bounds, in `scale`
    /// units.
    pub fn time(&self, scale: TimeScale) -> TimeValue64 {
        let inner = self.lock();
        let mut time = inner.time;
        if let Some(start) = inner.start {
            time = std::cmp::max(time, start);
        }
        if let Some(stop) = inner.stop {
            time = std::cmp::min(time, stop);
        }
        rescale(time, inner.scale, scale)
    }

    pub fn time_record(&self) -> TimeRecord {
        let scale = self.lock().scale;
        TimeRecord::new(self.time(scale), scale)
    }

    /// Set the current time. A stopped base (rate 0) holds the time
    /// it was set to.
    pub fn set_time(&self, record: TimeRecord) -> io::Result<()> {
        let mut inner = self.lock();
        TimeBase::check_thread(&inner)?;
        inner.time = rescale(record.value, record.scale, inner.scale);
        Ok(())
    }

    pub fn start_time(&self) -> Option<TimeRecord> {
        let inner = self.lock();
        inner.start.map(|v| TimeRecord::new(v, inner.scale))
    }

    pub fn set_start_time(&self, record: Option<TimeRecord>) -> io::Result<()> {
        let mut inner = self.lock();
        TimeBase::check_thread(&inner)?;
        inner.start = record.map(|r| rescale(r.value, r.scale, inner.scale));
        Ok(())
    }

    pub fn stop_time(&self) -> Option<TimeRecord> {
        let inner = self.lock();
        inner.stop.map(|v| TimeRecord::new(v, inner.scale))
    }

    pub fn set_stop_time(&self, record: Option<TimeRecord>) -> io::Result<()> {
        let mut inner = self.lock();
        TimeBase::check_thread(&inner)?;
        inner.stop = record.map(|r| rescale(r.value, r.scale, inner.scale));
        Ok(())
    }

    pub fn master(&self) -> Option<TimeBase> {
        self.lock().master.clone()
    }

    /// Slave this base to a master. Fails if that would create a
    /// cycle in the master chain.
    pub fn set_master(&self, master: Option<&TimeBase>) -> io::Result<()> {
        if let Some(master) = master {
            let mut walk = Some(master.clone());
            while let Some(tb) = walk {
                if tb.same_clock(self) {
                    return Err(ioerr!(InvalidInput, "master chain would contain a cycle"));
                }
                walk = tb.master();
            }
        }
        let mut inner = self.lock();
        TimeBase::check_thread(&inner)?;
        inner.master = master.cloned();
        Ok(())
    }

    /// Re-express a time on another base as a time on this base.
    ///
    /// Both bases are assumed to run off the same reference clock:
    /// the offset of `record` from the other base's current time,
    /// corrected for the ratio of the effective rates, is applied to
    /// our current time.
    pub fn convert_time(&self, record: &TimeRecord, from: &TimeBase) -> TimeRecord {
        let scale = self.lock().scale;
        if from.same_clock(self) {
            let mut rec = *record;
            convert_time_scale(&mut rec, scale);
            return rec;
        }
        let from_scale = from.lock().scale;
        let delta = rescale(record.value, record.scale, from_scale) - from.time(from_scale);
        let delta_secs = delta as f64 / from_scale as f64;

        let from_rate = from.effective_rate();
        let own_rate = self.effective_rate();
        let ref_secs = if from_rate != 0.0 { delta_secs / from_rate } else { 0.0 };
        let own_delta = (ref_secs * own_rate * scale as f64).round() as i64;
        TimeRecord::new(self.time(scale) + own_delta, scale)
    }
}

impl std::fmt::Debug for TimeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("TimeBase")
            .field("scale", &inner.scale)
            .field("rate", &inner.rate)
            .field("time", &inner.time)
            .field("start", &inner.start)
            .field("stop", &inner.stop)
            .field("slaved", &inner.master.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_rounds_to_nearest() {
        assert_eq!(rescale(100, 600, 600), 100);
        assert_eq!(rescale(100, 600, 1200), 200);
        assert_eq!(rescale(1, 3, 1000), 333);
        assert_eq!(rescale(2, 3, 1000), 667);
        assert_eq!(rescale(1, 2, 1), 1);
        assert_eq!(rescale(-1, 2, 1), -1);
        assert_eq!(rescale(-1, 3, 1000), -333);
    }

    #[test]
    fn convert_record() {
        let mut rec = TimeRecord::new(90000, 90000);
        convert_time_scale(&mut rec, 600);
        assert_eq!(rec.value, 600);
        assert_eq!(rec.scale, 600);
    }

    #[test]
    fn clamping() {
        let tb = TimeBase::new(600);
        tb.set_time(TimeRecord::new(1000, 600)).unwrap();
        assert_eq!(tb.time(600), 1000);
        tb.set_stop_time(Some(TimeRecord::new(800, 600))).unwrap();
        assert_eq!(tb.time(600), 800);
        tb.set_time(TimeRecord::new(-100, 600)).unwrap();
        tb.set_start_time(Some(TimeRecord::new(0, 600))).unwrap();
        assert_eq!(tb.time(600), 0);
    }

    #[test]
    fn effective_rate_is_chain_product() {
        let master = TimeBase::new(600);
        let slave = TimeBase::new(600);
        master.set_rate(2.0).unwrap();
        slave.set_rate(0.5).unwrap();
        slave.set_master(Some(&master)).unwrap();
        assert_eq!(slave.effective_rate(), 1.0);
        master.set_rate(4.0).unwrap();
        assert_eq!(slave.effective_rate(), 2.0);
    }

    #[test]
    fn master_cycle_rejected() {
        let a = TimeBase::new(600);
        let b = TimeBase::new(600);
        a.set_master(Some(&b)).unwrap();
        let err = b.set_master(Some(&a)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(a.set_master(Some(&a)).is_err());
    }

    #[test]
    fn convert_time_between_bases() {
        let a = TimeBase::new(600);
        let b = TimeBase::new(1000);
        a.set_time(TimeRecord::new(600, 600)).unwrap();
        b.set_time(TimeRecord::new(5000, 1000)).unwrap();

        // 1 second past a's current time is 1 second past b's.
        let rec = b.convert_time(&TimeRecord::new(1200, 600), &a);
        assert_eq!(rec.scale, 1000);
        assert_eq!(rec.value, 6000);

        // Same clock: just a scale change.
        let rec = a.convert_time(&TimeRecord::new(300, 600), &a.clone());
        assert_eq!(rec.value, 300);
    }

    #[test]
    fn thread_attachment_checked() {
        let tb = TimeBase::new(600);
        tb.attach_to_current_thread().unwrap();
        tb.set_rate(2.0).unwrap();

        let tb2 = tb.clone();
        let res = std::thread::spawn(move || tb2.set_rate(1.0)).join().unwrap();
        assert_eq!(res.unwrap_err().kind(), io::ErrorKind::WouldBlock);

        tb.detach_from_thread().unwrap();
        let tb2 = tb.clone();
        std::thread::spawn(move || {
            tb2.attach_to_current_thread().unwrap();
            tb2.set_rate(1.5).unwrap();
        })
        .join()
        .unwrap();
        assert_eq!(tb.rate(), 1.5);
    }
}
