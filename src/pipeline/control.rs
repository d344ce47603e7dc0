use std::{
    io::BufRead,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, TryRecvError, bounded};

/// Polled once per completed frame.
pub trait QuitSignal {
    fn should_quit(&mut self) -> bool;
}

impl QuitSignal for Arc<AtomicBool> {
    fn should_quit(&mut self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Never requests a stop.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverQuit;

impl QuitSignal for NeverQuit {
    fn should_quit(&mut self) -> bool {
        false
    }
}

/// Requests a stop when a line reading `q` arrives on stdin.
pub struct StdinQuit {
    rx: Receiver<()>,
}

impl StdinQuit {
    pub fn spawn() -> Self {
        let (tx, rx) = bounded(1);
        // The reader thread is left blocked on stdin at exit; nothing joins it.
        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if is_quit_command(&line) {
                    let _ = tx.try_send(());
                    break;
                }
            }
        });
        log::info!("type q and press Enter to stop");
        Self { rx }
    }
}

impl QuitSignal for StdinQuit {
    fn should_quit(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            // stdin closed without a quit command; keep running
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
        }
    }
}

fn is_quit_command(line: &str) -> bool {
    matches!(line.trim(), "q" | "Q" | "quit")
}
