//! Test doubles shared by unit tests.
use crate::invoke::{CommandOutput, CommandSpec, ExternalInvoker};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;

type Response = Box<dyn FnOnce(&CommandSpec) -> io::Result<CommandOutput>>;

/// Records every command and answers from a queue; exit 0 once the queue drains.
#[derive(Default)]
pub(crate) struct FakeInvoker {
    seen: RefCell<Vec<CommandSpec>>,
    responses: RefCell<VecDeque<Response>>,
}

impl FakeInvoker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn then<F>(self, respond: F) -> Self
    where
        F: FnOnce(&CommandSpec) -> io::Result<CommandOutput> + 'static,
    {
        self.responses.borrow_mut().push_back(Box::new(respond));
        self
    }

    pub(crate) fn then_stdout(self, stdout: &str) -> Self {
        let stdout = stdout.to_string();
        self.then(move |_| Ok(output(Some(0), &stdout, "")))
    }

    pub(crate) fn then_exit(self, code: i32, stderr: &str) -> Self {
        let stderr = stderr.to_string();
        self.then(move |_| Ok(output(Some(code), "", &stderr)))
    }

    pub(crate) fn seen(&self) -> Vec<CommandSpec> {
        self.seen.borrow().clone()
    }
}

impl ExternalInvoker for FakeInvoker {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        self.seen.borrow_mut().push(spec.clone());
        let next = self.responses.borrow_mut().pop_front();
        match next {
            Some(respond) => respond(spec),
            None => Ok(output(Some(0), "", "")),
        }
    }
}

pub(crate) fn output(exit_code: Option<i32>, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

pub(crate) fn write_file(path: &std::path::Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent directory");
    }
    std::fs::write(path, contents.as_bytes()).expect("write file");
}
