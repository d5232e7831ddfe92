use crate::core::{PlayerError, RawVideoFrame, Result, VideoImage};
use crate::player::converter::FrameConverter;
use crossbeam_channel::{unbounded, Sender};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

/// 发往转换线程的任务，帧的所有权随任务转移
#[derive(Debug)]
pub struct ConversionJob {
    /// 发起任务的管线实例
    pub owner: u64,
    pub timestamp: f64,
    pub frame: RawVideoFrame,
}

/// 转换完成回报
#[derive(Debug)]
pub struct ConversionResult {
    pub owner: u64,
    pub timestamp: f64,
    pub outcome: std::result::Result<VideoImage, String>,
    pub conversion_ms: f64,
    pub worker: usize,
}

pub type CompletionCallback = Arc<dyn Fn(ConversionResult) + Send + Sync>;

struct Worker {
    sender: Option<Sender<ConversionJob>>,
    handle: Option<JoinHandle<()>>,
}

/// 帧转换线程池
///
/// 每个线程独占一个任务队列，任务按轮询分派；完成顺序不保证。
pub struct WorkDelegator {
    workers: Mutex<Vec<Worker>>,
    next: AtomicUsize,
    worker_count: usize,
    callback: Arc<RwLock<Option<CompletionCallback>>>,
}

impl WorkDelegator {
    pub fn new(worker_count: usize, converter: Arc<dyn FrameConverter>) -> Result<Self> {
        if worker_count == 0 {
            return Err(PlayerError::Config("转换线程数至少为 1".to_string()));
        }

        let callback: Arc<RwLock<Option<CompletionCallback>>> = Arc::new(RwLock::new(None));
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let (tx, rx) = unbounded::<ConversionJob>();
            let converter = Arc::clone(&converter);
            let callback = Arc::clone(&callback);

            let handle = thread::Builder::new()
                .name(format!("frame-convert-{}", index))
                .spawn(move || {
                    debug!("{} 🧵 转换线程 {} 启动", log_ctx(), index);
                    // 发送端全部关闭后退出
                    for job in rx.iter() {
                        let started = Instant::now();
                        let ConversionJob {
                            owner,
                            timestamp,
                            frame,
                        } = job;
                        let outcome = converter.convert(frame);
                        let result = ConversionResult {
                            owner,
                            timestamp,
                            outcome,
                            conversion_ms: started.elapsed().as_secs_f64() * 1000.0,
                            worker: index,
                        };
                        let current = callback.read().clone();
                        match current {
                            Some(cb) => cb(result),
                            None => warn!(
                                "{} 转换完成但没有回调目标, 丢弃帧 {:.1}",
                                log_ctx(),
                                timestamp
                            ),
                        }
                    }
                    debug!("{} 转换线程 {} 退出", log_ctx(), index);
                })?;

            workers.push(Worker {
                sender: Some(tx),
                handle: Some(handle),
            });
        }

        info!("✅ 帧转换线程池启动: {} 个线程", worker_count);

        Ok(Self {
            workers: Mutex::new(workers),
            next: AtomicUsize::new(0),
            worker_count,
            callback,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// 设置唯一的完成回调（替换旧回调）
    pub fn on_completion(&self, callback: CompletionCallback) {
        *self.callback.write() = Some(callback);
    }

    /// 轮询分派任务，返回接收任务的线程下标
    pub fn dispatch(&self, job: ConversionJob) -> Result<usize> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.worker_count;
        let workers = self.workers.lock();
        let sender = workers
            .get(index)
            .and_then(|w| w.sender.as_ref())
            .ok_or_else(|| PlayerError::Other("转换线程池已关闭".to_string()))?;
        sender
            .send(job)
            .map_err(|_| PlayerError::Other(format!("转换线程 {} 已退出", index)))?;
        Ok(index)
    }

    /// 关闭队列并等待所有线程退出（可重复调用）
    pub fn shutdown(&self) {
        let mut workers = self.workers.lock();
        for worker in workers.iter_mut() {
            worker.sender.take();
        }
        let mut joined = 0;
        for worker in workers.iter_mut() {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!("{} 转换线程异常退出", log_ctx());
                }
                joined += 1;
            }
        }
        if joined > 0 {
            info!("{} 🛑 帧转换线程池已关闭", log_ctx());
        }
    }
}

impl Drop for WorkDelegator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
