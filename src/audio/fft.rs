//! Host FFT stream pool using RustFFT.
//!
//! Each buffer of a batch is transformed on its own stream (a scoped
//! thread). A batch larger than the provisioned stream count is rejected
//! rather than queued.

use rustfft::{num_complex::Complex, FftPlanner};
use std::sync::{Mutex, PoisonError};

use crate::gpu::compute::FourierError;
use crate::memory::Complex32;

/// A fixed number of host transform streams sharing one planner.
pub struct StreamPool {
    streams: usize,
    planner: Mutex<FftPlanner<f32>>,
}

impl StreamPool {
    pub fn new(streams: usize) -> Self {
        Self {
            streams: streams.max(1),
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    pub fn streams(&self) -> usize {
        self.streams
    }

    /// Forward transform of every real buffer.
    pub fn forward<C>(&self, buffers: &[C]) -> Result<Vec<Vec<Complex32>>, FourierError>
    where
        C: AsRef<[f32]> + Sync,
    {
        self.check_batch(buffers.len())?;
        let plans: Vec<_> = {
            let mut planner = self.planner.lock().unwrap_or_else(PoisonError::into_inner);
            buffers
                .iter()
                .map(|b| planner.plan_fft_forward(b.as_ref().len()))
                .collect()
        };

        Ok(std::thread::scope(|scope| {
            let handles: Vec<_> = buffers
                .iter()
                .zip(plans)
                .map(|(buffer, plan)| {
                    scope.spawn(move || {
                        let mut data: Vec<Complex<f32>> = buffer
                            .as_ref()
                            .iter()
                            .map(|&s| Complex::new(s, 0.0))
                            .collect();
                        plan.process(&mut data);
                        data.into_iter()
                            .map(|c| Complex32::new(c.re, c.im))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(join_stream).collect()
        }))
    }

    /// Inverse transform of every complex buffer, keeping the real part scaled by 1/n.
    pub fn inverse<C>(&self, buffers: &[C]) -> Result<Vec<Vec<f32>>, FourierError>
    where
        C: AsRef<[Complex32]> + Sync,
    {
        self.check_batch(buffers.len())?;
        let plans: Vec<_> = {
            let mut planner = self.planner.lock().unwrap_or_else(PoisonError::into_inner);
            buffers
                .iter()
                .map(|b| planner.plan_fft_inverse(b.as_ref().len()))
                .collect()
        };

        Ok(std::thread::scope(|scope| {
            let handles: Vec<_> = buffers
                .iter()
                .zip(plans)
                .map(|(buffer, plan)| {
                    scope.spawn(move || {
                        let mut data: Vec<Complex<f32>> = buffer
                            .as_ref()
                            .iter()
                            .map(|c| Complex::new(c.re, c.im))
                            .collect();
                        plan.process(&mut data);
                        let scale = 1.0 / data.len().max(1) as f32;
                        data.into_iter().map(|c| c.re * scale).collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(join_stream).collect()
        }))
    }

    fn check_batch(&self, requested: usize) -> Result<(), FourierError> {
        if requested > self.streams {
            log::warn!(
                "Transform batch of {} exceeds {} streams",
                requested,
                self.streams
            );
            return Err(FourierError::InsufficientStreams {
                requested,
                available: self.streams,
            });
        }
        Ok(())
    }
}

fn join_stream<T>(handle: std::thread::ScopedJoinHandle<'_, T>) -> T {
    handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}
