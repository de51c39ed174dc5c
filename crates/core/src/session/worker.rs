//! The worker context: the only thread that builds or tears down graphs.
//!
//! The application side makes request transitions (Idle → Starting,
//! Running → Stopping) under the state guard and then posts a [`Command`].
//! The worker performs the slow part and makes the completion transition.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;

use super::{Direction, ProducerConfig, ReceiverConfig, SessionEvent, Shared};
use crate::error::{GraphErrorKind, SessionError};
use crate::media::{PayloadDescriptor, PerKind};
use crate::pipeline::{ProducerPipeline, ReceiverPipeline};

pub(super) enum Command {
    StartProducer(ProducerConfig),
    StartReceiver(ReceiverConfig),
    Stop(Direction),
    Shutdown,
}

pub(super) fn spawn(
    shared: Arc<Shared>,
    commands: Receiver<Command>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("avsession-worker".to_string())
        .spawn(move || {
            Worker {
                shared,
                producer: None,
                receiver: None,
            }
            .run(commands)
        })
}

struct Worker {
    shared: Arc<Shared>,
    producer: Option<ProducerPipeline>,
    receiver: Option<ReceiverPipeline>,
}

impl Worker {
    fn run(mut self, commands: Receiver<Command>) {
        tracing::debug!("worker started");
        while let Ok(command) = commands.recv() {
            match command {
                Command::StartProducer(config) => self.start_producer(config),
                Command::StartReceiver(config) => self.start_receiver(config),
                Command::Stop(direction) => self.stop(direction),
                Command::Shutdown => break,
            }
        }
        self.shutdown();
    }

    fn start_producer(&mut self, config: ProducerConfig) {
        let built = ProducerPipeline::build(
            &self.shared.provider,
            &config,
            &self.shared.producer,
            &self.shared.config,
            &self.shared.closing,
        );
        let pipeline = match built {
            Ok(pipeline) => pipeline,
            Err(code) => return self.fail_start(Direction::Producer, code),
        };

        let payloads = pipeline.payloads().to_vec();
        {
            // Descriptors become visible together with Running.
            let mut state = self.shared.state(Direction::Producer).lock();
            if let Err(e) = state.complete_start() {
                tracing::error!(error = %e, "producer started in unexpected state, tearing down");
                return;
            }
            let mut local = self.shared.local_payloads.write();
            for payload in &payloads {
                *local.get_mut(payload.kind) = payload.clone();
            }
        }

        self.producer = Some(pipeline);
        tracing::info!(direction = %Direction::Producer, payloads = payloads.len(), "pipeline started");
        self.shared.emit(SessionEvent::Started {
            direction: Direction::Producer,
            payloads,
        });
    }

    fn start_receiver(&mut self, config: ReceiverConfig) {
        let built = ReceiverPipeline::build(
            &self.shared.provider,
            &config,
            &self.shared.receiver,
            &self.shared.config,
        );
        let pipeline = match built {
            Ok(pipeline) => pipeline,
            Err(code) => return self.fail_start(Direction::Receiver, code),
        };

        if let Err(e) = self.shared.state(Direction::Receiver).lock().complete_start() {
            tracing::error!(error = %e, "receiver started in unexpected state, tearing down");
            return;
        }

        self.receiver = Some(pipeline);
        tracing::info!(direction = %Direction::Receiver, "pipeline started");
        self.shared.emit(SessionEvent::Started {
            direction: Direction::Receiver,
            payloads: Vec::new(),
        });
    }

    fn fail_start(&mut self, direction: Direction, code: GraphErrorKind) {
        let message = SessionError::GraphConstruction {
            direction,
            kind: code.clone(),
        }
        .to_string();
        tracing::warn!(direction = %direction, error = %message, "pipeline failed to start");

        self.shared.relays(direction).clear();
        if let Err(e) = self.shared.state(direction).lock().abort_start() {
            tracing::error!(error = %e, "could not abort start");
        }
        self.shared.emit(SessionEvent::Error {
            direction,
            code,
            message,
        });
    }

    fn stop(&mut self, direction: Direction) {
        match direction {
            Direction::Producer => {
                if let Some(mut pipeline) = self.producer.take() {
                    pipeline.stop();
                }
                *self.shared.local_payloads.write() = PerKind::from_fn(PayloadDescriptor::unset);
            }
            Direction::Receiver => {
                if let Some(mut pipeline) = self.receiver.take() {
                    pipeline.stop();
                }
            }
        }
        self.shared.relays(direction).clear();

        match self.shared.state(direction).lock().complete_stop() {
            Ok(()) => {
                tracing::info!(direction = %direction, "pipeline stopped");
                self.shared.emit(SessionEvent::Stopped { direction });
            }
            Err(e) => tracing::error!(error = %e, "stop completed in unexpected state"),
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut pipeline) = self.producer.take() {
            pipeline.stop();
        }
        if let Some(mut pipeline) = self.receiver.take() {
            pipeline.stop();
        }
        tracing::debug!("worker exiting");
    }
}
