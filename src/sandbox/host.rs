//! Child side of the sandbox: an embedded interpreter that loads the
//! submitted sources, runs the test code under a line tracer and reports.
//!
//! Everything here runs inside the `sandbox-runner` process. Nothing in it
//! survives the run; the parent tears the process down afterwards.

use std::cell::RefCell;

use anyhow::{Result, anyhow};
use pyo3::exceptions::{PyAssertionError, PyImportError, PyNameError, PySyntaxError};
use pyo3::prelude::*;
use pyo3::types::{
    PyBool, PyDict, PyFloat, PyFrozenSet, PyInt, PyList, PyModule, PySet, PyString, PyTuple,
};
use serde_json::{Map, Value};

use super::classify::{
    ExceptionClass, classify_load_failure, classify_test_failure, describe_load_failure,
    module_name_for_path, parent_packages,
};
use super::protocol::{
    LoadErrorKind, RunnerRequest, RunnerResponse, SourceLoadError, TESTS_FILENAME, TestError,
};
use super::stubs::framework_stubs;
use crate::source::SourceFile;
use crate::trace::{
    BlockRegistry, Inspect, MAX_TRACE_STEPS, Shape, SnapshotLimits, TraceRecorder,
    snapshot_locals,
};

/// Execute one request in the embedded interpreter.
///
/// Source-load and test failures are part of the response. Only a failure
/// to set up the interpreter itself is an `Err`.
pub fn run(request: &RunnerRequest) -> Result<RunnerResponse> {
    pyo3::prepare_freethreaded_python();
    Python::with_gil(|py| {
        run_in(py, request).map_err(|err| anyhow!("interpreter setup failed: {err}"))
    })
}

fn run_in(py: Python<'_>, request: &RunnerRequest) -> PyResult<RunnerResponse> {
    let sys = py.import_bound("sys")?;
    let builtins = py.import_bound("builtins")?;
    let _stdout = StdoutRedirect::install(&sys)?;
    let stubs = framework_stubs(py)?;
    let mut table = ModuleTable::new(&sys)?;

    let namespace = PyDict::new_bound(py);
    namespace.set_item("__name__", "__main__")?;
    namespace.set_item("__builtins__", &builtins)?;

    let mut load_errors = Vec::new();
    for source in &request.sources {
        match load_source(py, source, &builtins, &stubs, &mut table, &namespace) {
            Ok(()) => tracing::debug!(file = %source.file_path, "source loaded"),
            Err(err) => {
                tracing::debug!(
                    file = %err.file_path,
                    kind = err.error_type.as_str(),
                    "source failed to load"
                );
                load_errors.push(err);
            }
        }
    }

    let recorder = TraceRecorder::new(
        BlockRegistry::build(&request.blocks),
        request.max_steps.unwrap_or(MAX_TRACE_STEPS),
    );
    let tracer = Bound::new(py, LineTracer::new(recorder, SnapshotLimits::default()))?;
    let outcome = {
        let _guard = TraceGuard::install(&sys, &tracer)?;
        exec_code(&builtins, &request.tests, TESTS_FILENAME, &namespace)
            .err()
            .map(|err| test_failure(py, &err))
    };

    let (trace, diagnostics) = tracer
        .borrow()
        .take_recorder()
        .map(TraceRecorder::finish)
        .unwrap_or_default();
    table.release();

    Ok(RunnerResponse::assemble(
        request.sources.len(),
        trace,
        load_errors,
        outcome,
        Some(diagnostics),
    ))
}

fn load_source<'py>(
    py: Python<'py>,
    source: &SourceFile,
    builtins: &Bound<'py, PyModule>,
    stubs: &Bound<'py, PyDict>,
    table: &mut ModuleTable<'py>,
    namespace: &Bound<'py, PyDict>,
) -> Result<(), SourceLoadError> {
    let module_name = module_name_for_path(&source.file_path);
    let module = table
        .prepare(&module_name, &source.file_path, stubs)
        .map_err(|err| setup_failure(py, &source.file_path, &err))?;

    exec_code(builtins, &source.code, &source.file_path, &module.dict())
        .map_err(|err| load_failure(py, &source.file_path, &err))?;

    table
        .register(&module_name, &module)
        .and_then(|()| merge_public_names(&module.dict(), namespace))
        .map_err(|err| setup_failure(py, &source.file_path, &err))
}

fn exec_code(
    builtins: &Bound<'_, PyModule>,
    code: &str,
    filename: &str,
    globals: &Bound<'_, PyDict>,
) -> PyResult<()> {
    let compiled = builtins.getattr("compile")?.call1((code, filename, "exec"))?;
    builtins.getattr("exec")?.call1((compiled, globals))?;
    Ok(())
}

fn merge_public_names(module_dict: &Bound<'_, PyDict>, namespace: &Bound<'_, PyDict>) -> PyResult<()> {
    for (name, value) in module_dict.iter() {
        let public = name
            .downcast::<PyString>()
            .map(|n| !n.to_string_lossy().starts_with("__"))
            .unwrap_or(false);
        if public {
            namespace.set_item(name, value)?;
        }
    }
    Ok(())
}

/// Modules created during one run, mirrored into `sys.modules` so the
/// submitted sources can import each other.
struct ModuleTable<'py> {
    sys_modules: Bound<'py, PyDict>,
    registered: Vec<String>,
}

impl<'py> ModuleTable<'py> {
    fn new(sys: &Bound<'py, PyModule>) -> PyResult<Self> {
        let sys_modules = sys.getattr("modules")?.downcast_into::<PyDict>()?;
        Ok(Self {
            sys_modules,
            registered: Vec::new(),
        })
    }

    /// Create parent packages and a fresh, stub-seeded module namespace.
    fn prepare(
        &mut self,
        module_name: &str,
        file_path: &str,
        stubs: &Bound<'py, PyDict>,
    ) -> PyResult<Bound<'py, PyModule>> {
        for package in parent_packages(module_name) {
            self.ensure_package(&package)?;
        }
        let module = PyModule::new_bound(self.sys_modules.py(), module_name)?;
        module.setattr("__file__", file_path)?;
        module.dict().update(stubs.as_mapping())?;
        Ok(module)
    }

    fn ensure_package(&mut self, name: &str) -> PyResult<()> {
        if self.sys_modules.contains(name)? {
            return Ok(());
        }
        let py = self.sys_modules.py();
        let package = PyModule::new_bound(py, name)?;
        package.setattr("__path__", PyList::empty_bound(py))?;
        self.register(name, &package)
    }

    fn register(&mut self, name: &str, module: &Bound<'py, PyModule>) -> PyResult<()> {
        self.sys_modules.set_item(name, module)?;
        self.registered.push(name.to_string());
        if let Some((parent, child)) = name.rsplit_once('.')
            && let Some(parent) = self.sys_modules.get_item(parent)?
        {
            parent.setattr(child, module)?;
        }
        Ok(())
    }

    fn release(self) {
        for name in self.registered.iter().rev() {
            if let Err(err) = self.sys_modules.del_item(name) {
                tracing::debug!(module = %name, error = %err, "module already gone");
            }
        }
    }
}

/// Points `sys.stdout` at `sys.stderr` so stdout carries only the response.
struct StdoutRedirect<'py> {
    sys: Bound<'py, PyModule>,
    original: Bound<'py, PyAny>,
}

impl<'py> StdoutRedirect<'py> {
    fn install(sys: &Bound<'py, PyModule>) -> PyResult<Self> {
        let original = sys.getattr("stdout")?;
        sys.setattr("stdout", sys.getattr("stderr")?)?;
        Ok(Self {
            sys: sys.clone(),
            original,
        })
    }
}

impl Drop for StdoutRedirect<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.sys.setattr("stdout", &self.original) {
            tracing::warn!(error = %err, "failed to restore sys.stdout");
        }
    }
}

/// Keeps the line tracer installed for its lifetime.
struct TraceGuard<'py> {
    sys: Bound<'py, PyModule>,
}

impl<'py> TraceGuard<'py> {
    fn install(sys: &Bound<'py, PyModule>, tracer: &Bound<'py, LineTracer>) -> PyResult<Self> {
        sys.call_method1("settrace", (tracer,))?;
        Ok(Self { sys: sys.clone() })
    }
}

impl Drop for TraceGuard<'_> {
    fn drop(&mut self) {
        let none = self.sys.py().None();
        if let Err(err) = self.sys.call_method1("settrace", (none,)) {
            tracing::warn!(error = %err, "failed to uninstall line tracer");
        }
    }
}

/// Interpreter trace function feeding a [`TraceRecorder`].
///
/// Installed with `sys.settrace`; returning itself from every call keeps it
/// active as the local trace function of each new frame.
#[pyclass(unsendable)]
struct LineTracer {
    recorder: RefCell<Option<TraceRecorder>>,
    limits: SnapshotLimits,
}

impl LineTracer {
    fn new(recorder: TraceRecorder, limits: SnapshotLimits) -> Self {
        Self {
            recorder: RefCell::new(Some(recorder)),
            limits,
        }
    }

    fn take_recorder(&self) -> Option<TraceRecorder> {
        self.recorder.take()
    }

    fn observe(&self, frame: &Bound<'_, PyAny>) -> PyResult<()> {
        // A busy recorder means we were re-entered from a capture.
        let Ok(mut slot) = self.recorder.try_borrow_mut() else {
            return Ok(());
        };
        let Some(recorder) = slot.as_mut() else {
            return Ok(());
        };

        let file_path: String = frame.getattr("f_code")?.getattr("co_filename")?.extract()?;
        let line: usize = frame.getattr("f_lineno")?.extract()?;

        let mut capture_error = None;
        recorder.on_line(&file_path, line, || {
            capture_locals(frame, self.limits).unwrap_or_else(|err| {
                capture_error = Some(err);
                Map::new()
            })
        });
        capture_error.map_or(Ok(()), Err)
    }
}

#[pymethods]
impl LineTracer {
    fn __call__(
        slf: &Bound<'_, Self>,
        frame: &Bound<'_, PyAny>,
        event: &str,
        _arg: &Bound<'_, PyAny>,
    ) -> PyObject {
        if event == "line"
            && let Err(err) = slf.borrow().observe(frame)
        {
            tracing::debug!(error = %err, "line event dropped");
        }
        slf.clone().into_any().unbind()
    }
}

fn capture_locals(frame: &Bound<'_, PyAny>, limits: SnapshotLimits) -> PyResult<Map<String, Value>> {
    let locals = frame.getattr("f_locals")?;
    let mut pairs = Vec::new();
    for item in locals.call_method0("items")?.iter()? {
        let (name, value): (String, Bound<'_, PyAny>) = item?.extract()?;
        pairs.push((name, value));
    }
    Ok(snapshot_locals(pairs, limits))
}

impl<'py> Inspect for Bound<'py, PyAny> {
    fn shape(&self, limit: usize) -> Shape<Self> {
        if self.is_none() {
            return Shape::Null;
        }
        // bool before int: bool is an int subclass.
        if let Ok(flag) = self.downcast::<PyBool>() {
            return Shape::Bool(flag.is_true());
        }
        if self.is_instance_of::<PyInt>() {
            return self.extract::<i64>().map(Shape::Int).unwrap_or(Shape::Opaque);
        }
        if let Ok(float) = self.downcast::<PyFloat>() {
            return Shape::Float(float.value());
        }
        if let Ok(text) = self.downcast::<PyString>() {
            return Shape::Str(text.to_string_lossy().into_owned());
        }
        if let Ok(dict) = self.downcast::<PyDict>() {
            return Shape::Mapping(field_pairs(dict, limit));
        }
        if self.is_instance_of::<PyList>()
            || self.is_instance_of::<PyTuple>()
            || self.is_instance_of::<PySet>()
            || self.is_instance_of::<PyFrozenSet>()
        {
            return match self.iter() {
                Ok(items) => Shape::Sequence(items.take(limit).filter_map(Result::ok).collect()),
                Err(_) => Shape::Opaque,
            };
        }
        if self.is_callable() || self.is_instance_of::<PyModule>() {
            return Shape::Opaque;
        }
        if let Ok(fields) = self.getattr("__dict__")
            && let Ok(fields) = fields.downcast::<PyDict>()
        {
            return Shape::Fields(field_pairs(fields, limit));
        }
        Shape::Opaque
    }

    fn repr_text(&self) -> String {
        self.repr()
            .map(|text| text.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unrepresentable>".to_string())
    }
}

fn field_pairs<'py>(dict: &Bound<'py, PyDict>, limit: usize) -> Vec<(String, Bound<'py, PyAny>)> {
    dict.iter()
        .take(limit)
        .map(|(key, value)| {
            let key = key
                .str()
                .map(|text| text.to_string_lossy().into_owned())
                .unwrap_or_else(|_| key.repr_text());
            (key, value)
        })
        .collect()
}

fn exception_class(py: Python<'_>, err: &PyErr) -> ExceptionClass {
    if err.is_instance_of::<PySyntaxError>(py) {
        ExceptionClass::Syntax
    } else if err.is_instance_of::<PyNameError>(py) {
        ExceptionClass::Name
    } else if err.is_instance_of::<PyImportError>(py) {
        ExceptionClass::Import
    } else if err.is_instance_of::<PyAssertionError>(py) {
        ExceptionClass::Assertion
    } else {
        ExceptionClass::Other
    }
}

/// `"TypeName: message"`, or just the type name when the message is empty.
fn exception_message(py: Python<'_>, err: &PyErr) -> String {
    let type_name = err
        .get_type_bound(py)
        .getattr("__name__")
        .and_then(|name| name.extract::<String>())
        .unwrap_or_else(|_| "Exception".to_string());
    let text = err.value_bound(py).to_string();
    if text.is_empty() {
        type_name
    } else {
        format!("{type_name}: {text}")
    }
}

/// The bare message and line number of a syntax error.
fn syntax_details(py: Python<'_>, err: &PyErr) -> (String, Option<usize>) {
    let value = err.value_bound(py);
    let message = value
        .getattr("msg")
        .and_then(|msg| msg.extract::<String>())
        .unwrap_or_else(|_| value.to_string());
    let line = value
        .getattr("lineno")
        .ok()
        .and_then(|line| line.extract::<usize>().ok());
    (message, line)
}

fn format_traceback(py: Python<'_>, err: &PyErr) -> Option<String> {
    let traceback = py.import_bound("traceback").ok()?;
    let lines = traceback
        .call_method1(
            "format_exception",
            (
                err.get_type_bound(py),
                err.value_bound(py).clone(),
                err.traceback_bound(py),
            ),
        )
        .ok()?;
    PyString::new_bound(py, "")
        .call_method1("join", (lines,))
        .ok()?
        .extract()
        .ok()
}

fn load_failure(py: Python<'_>, file_path: &str, err: &PyErr) -> SourceLoadError {
    let class = exception_class(py, err);
    let (message, line) = match class {
        ExceptionClass::Syntax => syntax_details(py, err),
        _ => (exception_message(py, err), None),
    };
    let kind = classify_load_failure(class, &message);
    SourceLoadError {
        file_path: file_path.to_string(),
        error_type: kind,
        message: describe_load_failure(kind, &message, line),
        line,
        traceback: format_traceback(py, err),
    }
}

fn setup_failure(py: Python<'_>, file_path: &str, err: &PyErr) -> SourceLoadError {
    SourceLoadError {
        file_path: file_path.to_string(),
        error_type: LoadErrorKind::ModuleSetupError,
        message: exception_message(py, err),
        line: None,
        traceback: None,
    }
}

fn test_failure(py: Python<'_>, err: &PyErr) -> TestError {
    let class = exception_class(py, err);
    let message = match class {
        ExceptionClass::Syntax => match syntax_details(py, err) {
            (message, Some(line)) => format!("Syntax error at line {line}: {message}"),
            (message, None) => message,
        },
        _ => exception_message(py, err),
    };
    TestError {
        error_type: classify_test_failure(class),
        message,
        traceback: format_traceback(py, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::protocol::TestErrorKind;
    use crate::trace::BasicBlock;
    use serde_json::json;

    fn block(id: &str, file: &str, line: usize) -> BasicBlock {
        BasicBlock {
            block_id: id.into(),
            file_path: file.into(),
            start_line: line,
            end_line: line,
        }
    }

    const AVERAGE: &str = "\
def average(xs):
    total = 0
    for x in xs:
        total += x
    return total / len(xs)
";

    fn average_blocks(file: &str) -> Vec<BasicBlock> {
        vec![
            block("b1", file, 2),
            block("b2", file, 3),
            block("b3", file, 4),
            block("b4", file, 5),
        ]
    }

    #[test]
    fn test_traces_average_end_to_end() {
        let request = RunnerRequest::new(
            vec![SourceFile::new("host_avg.py", AVERAGE)],
            average_blocks("host_avg.py"),
            "result = average([1, 2, 3])\nassert result == 2\n",
        );
        let response = run(&request).unwrap();

        assert!(response.ok, "{response:?}");
        assert!(response.test_execution_error.is_none());
        assert_eq!(response.summary.sources_loaded, 1);
        assert_eq!(response.trace[0].block_id, "b1");
        assert_eq!(response.trace[0].locals["xs"], json!([1, 2, 3]));
        assert_eq!(response.trace.last().unwrap().block_id, "b4");
        assert_eq!(response.trace.last().unwrap().locals["total"], json!(6));
        for pair in response.trace.windows(2) {
            assert!(pair[0].step_index < pair[1].step_index);
        }
    }

    #[test]
    fn test_assertion_failure_is_a_clean_run() {
        let request = RunnerRequest::new(
            vec![SourceFile::new("host_assert.py", AVERAGE)],
            average_blocks("host_assert.py"),
            "result = average([2, 4])\nassert result == 0, 'wrong average'\n",
        );
        let response = run(&request).unwrap();

        assert!(response.ok);
        let failure = response.test_execution_error.unwrap();
        assert_eq!(failure.error_type, TestErrorKind::AssertionFailure);
        assert!(failure.message.contains("wrong average"));
        assert!(failure.traceback.unwrap().contains("debug_session/tests.py"));
    }

    #[test]
    fn test_syntax_error_file_beside_valid_file() {
        let request = RunnerRequest::new(
            vec![
                SourceFile::new("host_broken.py", "def f(:\n    pass\n"),
                SourceFile::new("host_fine.py", "def double(x):\n    return x * 2\n"),
            ],
            vec![block("d1", "host_fine.py", 2)],
            "result = double(4)\nassert result == 8\n",
        );
        let response = run(&request).unwrap();

        assert!(!response.ok);
        assert!(response.error.is_none());
        assert_eq!(response.source_loading_errors.len(), 1);
        let load = &response.source_loading_errors[0];
        assert_eq!(load.file_path, "host_broken.py");
        assert_eq!(load.error_type, LoadErrorKind::SyntaxError);
        assert!(load.message.starts_with("Syntax error at line 1"));
        assert_eq!(response.summary.sources_loaded, 1);
        assert_eq!(response.trace.len(), 1);
        assert_eq!(response.trace[0].locals["x"], json!(4));
    }

    #[test]
    fn test_undefined_name_in_tests() {
        let request = RunnerRequest::new(
            vec![SourceFile::new("host_empty.py", "VALUE = 1\n")],
            Vec::new(),
            "missing_function()\n",
        );
        let response = run(&request).unwrap();

        assert!(!response.ok);
        let error = response.error.unwrap();
        assert_eq!(error.error_type, TestErrorKind::TestNameError);
        assert!(error.message.contains("missing_function"));
    }

    #[test]
    fn test_framework_stubs_let_decorated_modules_load() {
        let code = "\
@app.get('/health')
def health(db=Depends(None)):
    status = 'ok'
    return status
";
        let request = RunnerRequest::new(
            vec![SourceFile::new("host_routes.py", code)],
            vec![block("h1", "host_routes.py", 3)],
            "assert health() == 'ok'\n",
        );
        let response = run(&request).unwrap();

        assert!(response.ok, "{response:?}");
        assert_eq!(response.trace.len(), 1);
    }

    #[test]
    fn test_packages_are_created_for_nested_paths() {
        let request = RunnerRequest::new(
            vec![
                SourceFile::new("hostpkg/util.py", "def inc(x):\n    return x + 1\n"),
                SourceFile::new(
                    "hostpkg/main.py",
                    "from hostpkg.util import inc\n\ndef twice(x):\n    return inc(inc(x))\n",
                ),
            ],
            Vec::new(),
            "assert twice(1) == 3\n",
        );
        let response = run(&request).unwrap();
        assert!(response.ok, "{response:?}");
        assert!(response.test_execution_error.is_none());
    }

    #[test]
    fn test_step_budget_limits_trace() {
        let code = "def spin(n):\n    i = 0\n    while i < n:\n        i += 1\n    return i\n";
        let request = RunnerRequest::new(
            vec![SourceFile::new("host_spin.py", code)],
            vec![block("s1", "host_spin.py", 4)],
            "spin(500)\n",
        )
        .with_max_steps(10);
        let response = run(&request).unwrap();

        assert_eq!(response.trace.len(), 10);
        let diagnostics = response.diagnostics.unwrap();
        assert_eq!(diagnostics.dropped_matches, 490);
    }

    #[test]
    fn test_objects_snapshot_as_fields() {
        let code = "\
class Point:
    def __init__(self, x, y):
        self.x = x
        self.y = y

def norm1(p):
    total = abs(p.x) + abs(p.y)
    return total
";
        let request = RunnerRequest::new(
            vec![SourceFile::new("host_point.py", code)],
            vec![block("n1", "host_point.py", 8)],
            "norm1(Point(3, -4))\n",
        );
        let response = run(&request).unwrap();

        assert_eq!(response.trace.len(), 1);
        let locals = &response.trace[0].locals;
        // Attributes sit two levels down, at the depth limit.
        assert_eq!(locals["p"], json!({"x": "3", "y": "-4"}));
        assert_eq!(locals["total"], json!(7));
    }
}
