//! Pass-through stand-ins for web-framework symbols.
//!
//! Sources written against FastAPI, Flask or Django often reference `app`,
//! `Depends` or `Request` at import time. These stubs let such modules load
//! so their plain functions can still be exercised.

use pyo3::exceptions::PyAttributeError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyTuple};

/// `app`, and the result of `Flask(...)` / `Blueprint(...)`.
///
/// Any public attribute is a route method; calling it yields a decorator
/// that returns the decorated function unchanged.
#[pyclass(module = "tracemend_stubs", name = "RouteRegistrar")]
pub struct RouteRegistrar {}

#[pymethods]
impl RouteRegistrar {
    #[new]
    #[pyo3(signature = (*_args, **_kwargs))]
    fn new(_args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>) -> Self {
        RouteRegistrar {}
    }

    fn __getattr__(&self, name: &str) -> PyResult<RouteMethod> {
        if name.starts_with("__") {
            return Err(PyAttributeError::new_err(name.to_string()));
        }
        Ok(RouteMethod {})
    }

    #[pyo3(signature = (*_args, **_kwargs))]
    fn __call__(&self, _args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>) {}

    fn __repr__(&self) -> &'static str {
        "<stub route registrar>"
    }
}

#[pyclass(module = "tracemend_stubs", name = "RouteMethod")]
pub struct RouteMethod {}

#[pymethods]
impl RouteMethod {
    #[pyo3(signature = (*_args, **_kwargs))]
    fn __call__(&self, _args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>) -> PassThrough {
        PassThrough {}
    }
}

#[pyclass(module = "tracemend_stubs", name = "PassThrough")]
pub struct PassThrough {}

#[pymethods]
impl PassThrough {
    fn __call__(&self, func: PyObject) -> PyObject {
        func
    }
}

/// `Depends(get_db)`: remembers its argument and does nothing else.
#[pyclass(module = "tracemend_stubs", name = "Depends")]
pub struct InjectedMarker {
    dependency: Option<PyObject>,
}

#[pymethods]
impl InjectedMarker {
    #[new]
    #[pyo3(signature = (dependency = None, *_args, **_kwargs))]
    fn new(
        dependency: Option<PyObject>,
        _args: &Bound<'_, PyTuple>,
        _kwargs: Option<&Bound<'_, PyDict>>,
    ) -> Self {
        Self { dependency }
    }

    #[getter]
    fn dependency(&self, py: Python<'_>) -> PyObject {
        match &self.dependency {
            Some(dep) => dep.clone_ref(py),
            None => py.None(),
        }
    }

    fn __repr__(&self) -> &'static str {
        "Depends(<stub>)"
    }
}

/// `Request`: an inert placeholder type.
#[pyclass(module = "tracemend_stubs", name = "Request")]
pub struct RequestPlaceholder {}

#[pymethods]
impl RequestPlaceholder {
    #[new]
    #[pyo3(signature = (*_args, **_kwargs))]
    fn new(_args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>) -> Self {
        RequestPlaceholder {}
    }
}

/// Names pre-seeded into every module namespace before it executes.
pub fn framework_stubs(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let stubs = PyDict::new_bound(py);
    stubs.set_item("app", Bound::new(py, RouteRegistrar {})?)?;
    stubs.set_item("Flask", py.get_type_bound::<RouteRegistrar>())?;
    stubs.set_item("Blueprint", py.get_type_bound::<RouteRegistrar>())?;
    stubs.set_item("Depends", py.get_type_bound::<InjectedMarker>())?;
    stubs.set_item("Request", py.get_type_bound::<RequestPlaceholder>())?;
    stubs.set_item("sys", py.import_bound("sys")?)?;
    stubs.set_item("os", py.import_bound("os")?)?;
    if let Ok(requests) = py.import_bound("requests") {
        stubs.set_item("requests", requests)?;
    }
    Ok(stubs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_with_stubs<'py>(py: Python<'py>, code: &str) -> PyResult<Bound<'py, PyDict>> {
        let globals = framework_stubs(py)?;
        py.run_bound(code, Some(&globals), None)?;
        Ok(globals)
    }

    #[test]
    fn test_route_decorators_return_function_unchanged() {
        Python::with_gil(|py| {
            let globals = eval_with_stubs(
                py,
                "@app.post('/items')\ndef create(x):\n    return x * 2\nresult = create(21)\n",
            )
            .unwrap();
            let result: i64 = globals.get_item("result").unwrap().unwrap().extract().unwrap();
            assert_eq!(result, 42);
        });
    }

    #[test]
    fn test_flask_and_blueprint_register_routes() {
        Python::with_gil(|py| {
            let code = "\
server = Flask(__name__)
bp = Blueprint('api', __name__)
@server.route('/')
def index():
    return 'ok'
@bp.route('/x', methods=['GET'])
def x():
    return 'x'
out = index() + x()
";
            let globals = framework_stubs(py).unwrap();
            globals.set_item("__name__", "m").unwrap();
            py.run_bound(code, Some(&globals), None).unwrap();
            let out: String = globals.get_item("out").unwrap().unwrap().extract().unwrap();
            assert_eq!(out, "okx");
        });
    }

    #[test]
    fn test_depends_and_request_are_inert() {
        Python::with_gil(|py| {
            let globals = eval_with_stubs(
                py,
                "def get_db():\n    return 1\ndef handler(req: Request, db=Depends(get_db)):\n    return db.dependency is get_db\nflag = handler(Request())\n",
            )
            .unwrap();
            let flag: bool = globals.get_item("flag").unwrap().unwrap().extract().unwrap();
            assert!(flag);
        });
    }

    #[test]
    fn test_dunder_lookups_are_not_swallowed() {
        Python::with_gil(|py| {
            let globals = eval_with_stubs(py, "missing = hasattr(app, '__wrapped__')\n").unwrap();
            let missing: bool = globals.get_item("missing").unwrap().unwrap().extract().unwrap();
            assert!(!missing);
        });
    }
}
