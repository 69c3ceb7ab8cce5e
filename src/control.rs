// SPDX-License-Identifier: MIT
//
// Control-plane worker (spec.md §4.5): a single-threaded executor that
// serializes CONN_REQ / CONN_ACK / CONN_CLOSE handling off the RX callback
// path. Generalizes the original driver's single-threaded workqueue
// (`create_singlethread_workqueue("riocm_wq")`) to userspace: one OS thread
// draining one queue, preserving the "never two control frames processed
// concurrently" property.

use std::sync::mpsc;
use std::sync::Weak;
use std::thread;

use log::warn;

use crate::port::Port;
use crate::wire::FrameHeader;

/// Work handed to the control-plane worker by a port's RX path.
pub enum ControlTask {
    ConnReq { port: Weak<Port>, header: FrameHeader },
    ConnAck { port: Weak<Port>, header: FrameHeader },
    Close { port: Weak<Port>, header: FrameHeader },
}

pub struct ControlWorker {
    tx: mpsc::Sender<ControlTask>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ControlWorker {
    /// Spawn the worker thread. `handle_task` runs on that thread alone, for
    /// the lifetime of the worker.
    pub fn spawn(mut handle_task: impl FnMut(ControlTask) + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel::<ControlTask>();
        let handle = thread::Builder::new()
            .name("cm-control".into())
            .spawn(move || {
                for task in rx {
                    handle_task(task);
                }
            })
            .expect("failed to spawn control-plane worker thread");
        Self { tx, handle: Some(handle) }
    }

    /// Enqueue a task. Silently dropped (with a log line) if the worker has
    /// already shut down — that only happens during `Manager::shutdown`,
    /// by which point there is nothing left to notify.
    pub fn submit(&self, task: ControlTask) {
        if self.tx.send(task).is_err() {
            warn!("control-plane worker gone, dropping task");
        }
    }
}

impl Drop for ControlWorker {
    fn drop(&mut self) {
        // Dropping `tx` closes the channel, which ends the worker's `for`
        // loop; then wait for it to actually finish draining.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn tasks_run_on_the_worker_thread_in_order() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let worker = ControlWorker::spawn(move |task| {
            if let ControlTask::ConnReq { header, .. } = task {
                // sequence number stashed in rsvd for this test only
                assert_eq!(header.rsvd as usize, seen2.fetch_add(1, Ordering::SeqCst));
            }
        });
        for i in 0..5u16 {
            worker.submit(ControlTask::ConnReq {
                port: Weak::new(),
                header: FrameHeader {
                    src_destid: 0,
                    dst_destid: 0,
                    src_mbox: 0,
                    dst_mbox: 0,
                    frame_type: 0,
                    ch_op: 0,
                    dst_ch: 0,
                    src_ch: 0,
                    msg_len: 0,
                    rsvd: i,
                },
            });
        }
        drop(worker);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }
}
