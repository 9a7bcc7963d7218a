use crate::aggregate::{run_global_stock, run_main_store};
use crate::config::Settings;
use crate::context::{JobKind, RunContext, RunSummary};
use crate::error::PipelineError;
use crate::reorder::{run_reorder, ReorderInputs};
use chrono::NaiveDate;
use crossbeam_channel::{unbounded, Receiver, SendError, Sender};
use log::{debug, error};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Job {
    GlobalStock { input: PathBuf, output: PathBuf },
    MainStore { input: PathBuf, output: PathBuf },
    Reorder { inputs: ReorderInputs, output: PathBuf },
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::GlobalStock { .. } => JobKind::GlobalStock,
            Job::MainStore { .. } => JobKind::MainStore,
            Job::Reorder { .. } => JobKind::Reorder,
        }
    }

    pub fn run(&self, ctx: RunContext) -> Result<RunSummary, PipelineError> {
        match self {
            Job::GlobalStock { input, output } => run_global_stock(input, output, ctx),
            Job::MainStore { input, output } => run_main_store(input, output, ctx),
            Job::Reorder { inputs, output } => run_reorder(inputs, output, ctx),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run { job: Job, as_of: NaiveDate },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub job: JobKind,
    pub kind: &'static str,
    pub message: String,
}

impl Failure {
    pub fn new(job: JobKind, err: &PipelineError) -> Self {
        Failure {
            job,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({}): {}", self.job, self.kind, self.message)
    }
}

impl std::error::Error for Failure {}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Started(JobKind),
    Progress(JobKind, String),
    Finished(Result<RunSummary, Failure>),
}

pub struct Worker {
    commands: Sender<Command>,
    events: Receiver<WorkerEvent>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(settings: Settings) -> Worker {
        let (command_tx, command_rx) = unbounded::<Command>();
        let (event_tx, event_rx) = unbounded::<WorkerEvent>();

        let handle = thread::Builder::new()
            .name("pharmacy-stock-worker".to_string())
            .spawn(move || worker_loop(settings, command_rx, event_tx))
            .ok();
        if handle.is_none() {
            error!("Failed to start worker thread");
        }

        Worker {
            commands: command_tx,
            events: event_rx,
            handle,
        }
    }

    pub fn submit(&self, job: Job, as_of: NaiveDate) -> Result<(), SendError<Command>> {
        self.commands.send(Command::Run { job, as_of })
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    /// Blocks until the current job finishes. `None` if the worker went away.
    pub fn wait(
        &self,
        mut on_progress: impl FnMut(JobKind, &str),
    ) -> Option<Result<RunSummary, Failure>> {
        for event in self.events.iter() {
            match event {
                WorkerEvent::Started(kind) => debug!("{} started", kind),
                WorkerEvent::Progress(kind, message) => on_progress(kind, &message),
                WorkerEvent::Finished(result) => return Some(result),
            }
        }
        None
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(settings: Settings, commands: Receiver<Command>, events: Sender<WorkerEvent>) {
    for command in commands.iter() {
        match command {
            Command::Run { job, as_of } => {
                let kind = job.kind();
                if events.send(WorkerEvent::Started(kind)).is_err() {
                    break;
                }
                let progress_tx = events.clone();
                let ctx = RunContext::new(settings.clone(), as_of).with_progress(move |msg| {
                    let _ = progress_tx.send(WorkerEvent::Progress(kind, msg.to_string()));
                });
                let result = job.run(ctx).map_err(|e| Failure::new(kind, &e));
                if events.send(WorkerEvent::Finished(result)).is_err() {
                    break;
                }
            }
            Command::Shutdown => break,
        }
    }
    debug!("Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn runs_jobs_in_order_and_reports_results() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("Material_Global_Stock_Report.CSV");
        std::fs::write(&input, "ItemCode,Location,Qty\nA1,Ward 1,3\nA1,Ward 2,4\n").unwrap();
        let output = dir.path().join("Material_Global_Stock_Lookup.xlsx");

        let worker = Worker::spawn(Settings::default());
        worker
            .submit(
                Job::GlobalStock {
                    input: input.clone(),
                    output: output.clone(),
                },
                today(),
            )
            .unwrap();
        worker
            .submit(
                Job::MainStore {
                    input: dir.path().join("missing.xlsx"),
                    output: dir.path().join("main.xlsx"),
                },
                today(),
            )
            .unwrap();

        let mut progress = Vec::new();
        let first = worker
            .wait(|_, msg| progress.push(msg.to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(first.job, JobKind::GlobalStock);
        assert_eq!(first.row_count, 1);
        assert_eq!(first.total_quantity, 7.0);
        assert!(output.exists());
        assert!(progress.iter().any(|m| m.starts_with("Loading")));

        let second = worker.wait(|_, _| {}).unwrap().unwrap_err();
        assert_eq!(second.job, JobKind::MainStore);
        assert_eq!(second.kind, "missing_input_file");
        assert!(!dir.path().join("main.xlsx").exists());

        worker.shutdown();
    }

    #[test]
    fn failure_display_names_job_and_kind() {
        let err = PipelineError::IoWrite {
            path: PathBuf::from("INVENTORY_CALCULATION.xlsx"),
            reason: "Permission denied".to_string(),
        };
        let failure = Failure::new(JobKind::Reorder, &err);
        assert_eq!(
            failure.to_string(),
            "Inventory calculation failed (io_write): Failed to write INVENTORY_CALCULATION.xlsx: Permission denied"
        );
    }
}
