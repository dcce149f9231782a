//! C ABI over [`ModelHandle`].
//!
//! Models are addressed by integer ids held in a process-wide registry. Id `0` is never
//! issued and signals a failed `create_*`/`load_*` call. Ids are never reused, so a
//! released or unknown id yields [`Status::UseAfterRelease`] instead of touching freed
//! memory.
//!
//! Every fallible call returns a [`Status`] code; the message of the last failure on the
//! calling thread is available through [`last_error_message`].
//!
//! Arrays handed back to the caller (`*mut f64` + length) are owned by the caller and must
//! be returned exactly once to [`free_buffer`] with the same length.
//!
//! Calls on distinct ids are independent. Calls on the same id are serialized.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::warn;

use crate::{
    Error, ErrorKind, FitConfig, FitParams, FitReport, LinearRegressor, MatrixView, Mlp,
    ModelHandle, Perceptron, PerceptronConfig, Result,
};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    ShapeMismatch = 1,
    InvalidConfig = 2,
    NumericalFailure = 3,
    IoFailure = 4,
    UseAfterRelease = 5,
    /// A null pointer or non-UTF-8 path was passed.
    InvalidArgument = 6,
    /// The call panicked.
    Internal = 7,
}

impl From<ErrorKind> for Status {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ShapeMismatch => Status::ShapeMismatch,
            ErrorKind::InvalidConfig => Status::InvalidConfig,
            ErrorKind::NumericalFailure => Status::NumericalFailure,
            ErrorKind::IoFailure => Status::IoFailure,
            ErrorKind::UseAfterRelease => Status::UseAfterRelease,
        }
    }
}

/// Failure inside a shim call.
enum Failure {
    Model(Error),
    Argument(&'static str),
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        Failure::Model(e)
    }
}

type FfiResult<T> = std::result::Result<T, Failure>;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_last_error(msg: String) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(msg));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

fn report(failure: Failure) -> Status {
    let (status, msg) = match failure {
        Failure::Model(e) => (Status::from(e.kind()), e.to_string()),
        Failure::Argument(what) => (Status::InvalidArgument, format!("invalid argument: {what}")),
    };
    set_last_error(msg);
    status
}

/// Run `f`, converting errors and panics into a status code.
fn guard<F: FnOnce() -> FfiResult<()>>(f: F) -> i32 {
    let status = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {
            clear_last_error();
            Status::Ok
        }
        Ok(Err(failure)) => report(failure),
        Err(_) => {
            warn!("panic caught at the C boundary");
            set_last_error("internal error".to_owned());
            Status::Internal
        }
    };
    status as i32
}

/// Like [`guard`] for constructors: returns the new id, or `0` on failure.
fn guard_create<F: FnOnce() -> FfiResult<ModelHandle>>(f: F) -> u64 {
    let mut id = 0;
    guard(|| {
        id = insert(f()?);
        Ok(())
    });
    id
}

struct Registry {
    next_id: u64,
    handles: HashMap<u64, Arc<Mutex<ModelHandle>>>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        Mutex::new(Registry {
            next_id: 1,
            handles: HashMap::new(),
        })
    })
}

fn insert(handle: ModelHandle) -> u64 {
    let mut reg = registry().lock().unwrap_or_else(PoisonError::into_inner);
    let id = reg.next_id;
    reg.next_id += 1;
    reg.handles.insert(id, Arc::new(Mutex::new(handle)));
    id
}

fn with_handle<T>(id: u64, f: impl FnOnce(&mut ModelHandle) -> Result<T>) -> FfiResult<T> {
    let entry = registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .handles
        .get(&id)
        .cloned()
        .ok_or(Error::UseAfterRelease)?;
    let mut handle = entry.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(f(&mut handle)?)
}

unsafe fn input<'a>(data: *const f64, len: usize, what: &'static str) -> FfiResult<&'a [f64]> {
    if len == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        return Err(Failure::Argument(what));
    }
    Ok(slice::from_raw_parts(data, len))
}

unsafe fn matrix<'a>(
    data: *const f64,
    rows: usize,
    cols: usize,
    what: &'static str,
) -> FfiResult<MatrixView<'a>> {
    let len = rows
        .checked_mul(cols)
        .ok_or_else(|| Error::ShapeMismatch(format!("{what}: {rows} x {cols} overflows")))?;
    Ok(MatrixView::new(input(data, len, what)?, rows, cols)?)
}

unsafe fn path_arg<'a>(path: *const c_char) -> FfiResult<&'a str> {
    if path.is_null() {
        return Err(Failure::Argument("path is null"));
    }
    CStr::from_ptr(path)
        .to_str()
        .map_err(|_| Failure::Argument("path is not valid UTF-8"))
}

fn require<T>(p: *mut T, what: &'static str) -> FfiResult<()> {
    if p.is_null() {
        return Err(Failure::Argument(what));
    }
    Ok(())
}

/// Whether an optional `(buffer, len)` output pair was requested. Exactly one null
/// pointer is an argument error.
fn optional_out(out: *mut *mut f64, out_len: *mut usize, what: &'static str) -> FfiResult<bool> {
    match (out.is_null(), out_len.is_null()) {
        (true, true) => Ok(false),
        (false, false) => Ok(true),
        _ => Err(Failure::Argument(what)),
    }
}

/// Hand a buffer to the caller. Pair with [`free_buffer`].
fn export(values: Vec<f64>) -> (*mut f64, usize) {
    let boxed = values.into_boxed_slice();
    let len = boxed.len();
    (Box::into_raw(boxed).cast::<f64>(), len)
}

unsafe fn export_into(values: Vec<f64>, out: *mut *mut f64, out_len: *mut usize) {
    let (p, len) = export(values);
    *out = p;
    *out_len = len;
}

/// Release a buffer returned by this library.
///
/// # Safety
/// `data`/`len` must come from a single earlier call of this library and must not have
/// been freed already. Null is ignored.
#[no_mangle]
pub unsafe extern "C" fn free_buffer(data: *mut f64, len: usize) {
    if data.is_null() {
        return;
    }
    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(data, len)));
}

/// Copy the last error message of this thread into `buf` as a NUL-terminated string.
///
/// Returns the message length in bytes, excluding the terminator (0 if there is none).
/// The copy is truncated to `cap - 1` bytes.
///
/// # Safety
/// `buf` must be null or valid for writes of `cap` bytes.
#[no_mangle]
pub unsafe extern "C" fn last_error_message(buf: *mut c_char, cap: usize) -> usize {
    LAST_ERROR.with(|slot| {
        let slot = slot.borrow();
        let Some(msg) = slot.as_deref() else {
            if !buf.is_null() && cap > 0 {
                *buf = 0;
            }
            return 0;
        };
        if !buf.is_null() && cap > 0 {
            let n = msg.len().min(cap - 1);
            ptr::copy_nonoverlapping(msg.as_ptr().cast::<c_char>(), buf, n);
            *buf.add(n) = 0;
        }
        msg.len()
    })
}

#[no_mangle]
pub extern "C" fn create_perceptron_model(input_size: usize) -> u64 {
    guard_create(|| Ok(ModelHandle::new(Perceptron::new(input_size)?)))
}

#[no_mangle]
pub extern "C" fn create_linear_regressor(input_size: usize) -> u64 {
    guard_create(|| Ok(ModelHandle::new(LinearRegressor::new(input_size)?)))
}

/// Create an MLP from `num_sizes` neuron counts (input width first).
///
/// # Safety
/// `sizes` must be valid for reads of `num_sizes` values.
#[no_mangle]
pub unsafe extern "C" fn create_mlp(
    sizes: *const usize,
    num_sizes: usize,
    classification: bool,
    seed: u64,
) -> u64 {
    guard_create(|| {
        if sizes.is_null() {
            return Err(Failure::Argument("sizes is null"));
        }
        let sizes = slice::from_raw_parts(sizes, num_sizes);
        Ok(ModelHandle::new(Mlp::new_with_seed(
            sizes,
            classification,
            seed,
        )?))
    })
}

/// # Safety
/// `path` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn load_mlp_model(path: *const c_char) -> u64 {
    guard_create(|| Ok(ModelHandle::load_mlp(path_arg(path)?)?))
}

/// # Safety
/// `path` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn save_mlp_model(id: u64, path: *const c_char) -> i32 {
    guard(|| {
        let path = path_arg(path)?;
        with_handle(id, |h| h.save(path))
    })
}

#[no_mangle]
pub extern "C" fn release_model(id: u64) -> i32 {
    guard(|| {
        let entry = registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handles
            .remove(&id)
            .ok_or(Error::UseAfterRelease)?;
        let mut handle = entry.lock().unwrap_or_else(PoisonError::into_inner);
        handle.release()?;
        Ok(())
    })
}

/// # Safety
/// `out` must be valid for a write.
#[no_mangle]
pub unsafe extern "C" fn get_input_size(id: u64, out: *mut usize) -> i32 {
    guard(|| {
        require(out, "out is null")?;
        *out = with_handle(id, |h| h.input_size())?;
        Ok(())
    })
}

/// # Safety
/// `out` must be valid for a write.
#[no_mangle]
pub unsafe extern "C" fn get_output_size(id: u64, out: *mut usize) -> i32 {
    guard(|| {
        require(out, "out is null")?;
        *out = with_handle(id, |h| h.output_size())?;
        Ok(())
    })
}

/// Number of weight matrices (1 for the linear models).
///
/// # Safety
/// `out` must be valid for a write.
#[no_mangle]
pub unsafe extern "C" fn get_layer_count(id: u64, out: *mut usize) -> i32 {
    guard(|| {
        require(out, "out is null")?;
        *out = with_handle(id, |h| Ok(h.weights()?.len()))?;
        Ok(())
    })
}

/// Predict one sample. The result buffer has `output_size` values.
///
/// # Safety
/// `x` must be valid for reads of `len` values; `out`/`out_len` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn predict_one(
    id: u64,
    x: *const f64,
    len: usize,
    out: *mut *mut f64,
    out_len: *mut usize,
) -> i32 {
    guard(|| {
        require(out, "out is null")?;
        require(out_len, "out_len is null")?;
        let x = input(x, len, "x is null")?;
        let y = with_handle(id, |h| h.predict_one(x))?;
        export_into(y, out, out_len);
        Ok(())
    })
}

/// Predict a row-major `(rows, cols)` batch. The result is row-major `(out_rows, out_cols)`.
///
/// # Safety
/// `x` must be valid for reads of `rows * cols` values; the out pointers must be valid for
/// writes.
#[no_mangle]
pub unsafe extern "C" fn predict_batch_flat(
    id: u64,
    x: *const f64,
    rows: usize,
    cols: usize,
    out: *mut *mut f64,
    out_rows: *mut usize,
    out_cols: *mut usize,
) -> i32 {
    guard(|| {
        require(out, "out is null")?;
        require(out_rows, "out_rows is null")?;
        require(out_cols, "out_cols is null")?;
        let x = matrix(x, rows, cols, "x")?;
        let y = with_handle(id, |h| h.predict_batch(x))?;
        *out_rows = y.rows();
        *out_cols = y.cols();
        *out = export(y.into_vec()).0;
        Ok(())
    })
}

unsafe fn train(
    id: u64,
    x: (*const f64, usize, usize),
    y: (*const f64, usize, usize),
    params: FitParams,
) -> FfiResult<FitReport> {
    let x = matrix(x.0, x.1, x.2, "x")?;
    let y = matrix(y.0, y.1, y.2, "y")?;
    with_handle(id, |h| h.fit(x, y, &params))
}

/// Train a perceptron with the delta rule. The per-epoch error trace is returned in
/// `errors` (pass null for both `errors` and `errors_len` to discard it).
///
/// # Safety
/// `x` must hold `rows * x_cols` values and `y` `rows * y_cols` values; `errors` and
/// `errors_len` must both be null or both be valid for writes.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn train_perceptron(
    id: u64,
    x: *const f64,
    rows: usize,
    x_cols: usize,
    y: *const f64,
    y_cols: usize,
    epochs: usize,
    learning_rate: f64,
    errors: *mut *mut f64,
    errors_len: *mut usize,
) -> i32 {
    guard(|| {
        let want_errors = optional_out(
            errors,
            errors_len,
            "errors and errors_len must both be null or both be set",
        )?;
        let cfg = PerceptronConfig {
            epochs,
            learning_rate,
            ..PerceptronConfig::default()
        };
        let report = train(
            id,
            (x, rows, x_cols),
            (y, rows, y_cols),
            FitParams::Perceptron(cfg),
        )?;
        if want_errors {
            export_into(report.train_errors, errors, errors_len);
        }
        Ok(())
    })
}

/// Fit a linear regressor in closed form.
///
/// # Safety
/// `x` must hold `rows * x_cols` values and `y` `rows * y_cols` values.
#[no_mangle]
pub unsafe extern "C" fn train_linear_regressor(
    id: u64,
    x: *const f64,
    rows: usize,
    x_cols: usize,
    y: *const f64,
    y_cols: usize,
) -> i32 {
    guard(|| {
        train(
            id,
            (x, rows, x_cols),
            (y, rows, y_cols),
            FitParams::LinearRegressor,
        )?;
        Ok(())
    })
}

/// Train an MLP. Mismatched X/Y row counts are rejected with `ShapeMismatch`.
///
/// # Safety
/// `x` must hold `x_rows * x_cols` values and `y` `y_rows * y_cols` values; each trace
/// pointer pair must be null or valid for writes.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn train_mlp(
    id: u64,
    x: *const f64,
    x_rows: usize,
    x_cols: usize,
    y: *const f64,
    y_rows: usize,
    y_cols: usize,
    num_iter: usize,
    learning_rate: f64,
    train_proportion: f64,
    error_list_size: usize,
    train_errors: *mut *mut f64,
    train_errors_len: *mut usize,
    test_errors: *mut *mut f64,
    test_errors_len: *mut usize,
) -> i32 {
    guard(|| {
        let want_train = optional_out(
            train_errors,
            train_errors_len,
            "train_errors and train_errors_len must both be null or both be set",
        )?;
        let want_test = optional_out(
            test_errors,
            test_errors_len,
            "test_errors and test_errors_len must both be null or both be set",
        )?;
        let cfg = FitConfig {
            num_iter,
            learning_rate,
            train_proportion,
            error_list_size,
            ..FitConfig::default()
        };
        let report = train(
            id,
            (x, x_rows, x_cols),
            (y, y_rows, y_cols),
            FitParams::Mlp(cfg),
        )?;
        if want_train {
            export_into(report.train_errors, train_errors, train_errors_len);
        }
        if want_test {
            export_into(report.test_errors, test_errors, test_errors_len);
        }
        Ok(())
    })
}

/// Copy of the weight matrix of `layer`, row-major `(units, previous units)`.
///
/// # Safety
/// The out pointers must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn get_weights(
    id: u64,
    layer: usize,
    out: *mut *mut f64,
    out_rows: *mut usize,
    out_cols: *mut usize,
) -> i32 {
    guard(|| {
        require(out, "out is null")?;
        require(out_rows, "out_rows is null")?;
        require(out_cols, "out_cols is null")?;
        let w = with_handle(id, |h| {
            h.weights()?.into_iter().nth(layer).ok_or_else(|| {
                Error::InvalidConfig(format!("layer index {layer} is out of range"))
            })
        })?;
        *out_rows = w.weights.rows();
        *out_cols = w.weights.cols();
        *out = export(w.weights.into_vec()).0;
        Ok(())
    })
}

/// Copy of the bias vector of `layer`.
///
/// # Safety
/// The out pointers must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn get_biases(
    id: u64,
    layer: usize,
    out: *mut *mut f64,
    out_len: *mut usize,
) -> i32 {
    guard(|| {
        require(out, "out is null")?;
        require(out_len, "out_len is null")?;
        let w = with_handle(id, |h| {
            h.weights()?.into_iter().nth(layer).ok_or_else(|| {
                Error::InvalidConfig(format!("layer index {layer} is out of range"))
            })
        })?;
        export_into(w.biases, out, out_len);
        Ok(())
    })
}
