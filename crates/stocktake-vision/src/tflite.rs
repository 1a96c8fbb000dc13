use anyhow::{anyhow, Result};
use image::{imageops::FilterType, RgbImage};
use std::{
    ffi::CString,
    os::raw::{c_char, c_int, c_void},
    ptr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};
use tracing::{info, warn};

use crate::config::DetectorConfig;
use crate::detection::RawDetection;
use crate::postprocess::{decode_ultralytics, nms_filter};
use crate::Detector;

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;
#[repr(C)]
struct TfLiteDelegate;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);
    #[cfg_attr(not(feature = "vision-coral"), allow(dead_code))]
    fn TfLiteInterpreterOptionsAddDelegate(options: *mut TfLiteInterpreterOptions, delegate: *mut TfLiteDelegate);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

#[cfg(feature = "vision-coral")]
#[link(name = "edgetpu")]
extern "C" {
    fn edgetpu_create_delegate(device_type: c_int, device_path: *const c_char, options: *const c_char) -> *mut TfLiteDelegate;
    fn edgetpu_free_delegate(delegate: *mut TfLiteDelegate);
}

// One interpreter with its own tensors. Only ever touched behind a Mutex.
struct Interpreter {
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
    #[cfg(feature = "vision-coral")]
    delegate: Option<*mut TfLiteDelegate>,
}

unsafe impl Send for Interpreter {}

impl Interpreter {
    fn create(model: *const TfLiteModel, cfg: &DetectorConfig) -> Result<Self> {
        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        anyhow::ensure!(!opts.is_null(), "failed to create tflite options");
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, cfg.threads.max(1) as c_int); }

        #[cfg(feature = "vision-coral")]
        let delegate = if cfg.use_coral {
            let d = unsafe { edgetpu_create_delegate(0, ptr::null(), ptr::null()) };
            if d.is_null() {
                unsafe { TfLiteInterpreterOptionsDelete(opts); }
                anyhow::bail!("failed to create EdgeTPU delegate");
            }
            unsafe { TfLiteInterpreterOptionsAddDelegate(opts, d); }
            Some(d)
        } else { None };

        // Built up front so Drop releases whatever was created if a later step fails.
        let mut slot = Self {
            opts,
            interp: ptr::null_mut(),
            #[cfg(feature = "vision-coral")]
            delegate,
        };

        slot.interp = unsafe { TfLiteInterpreterCreate(model, opts) };
        anyhow::ensure!(!slot.interp.is_null(), "failed to create tflite interpreter");

        let rc = unsafe { TfLiteInterpreterAllocateTensors(slot.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");
        Ok(slot)
    }

    fn input(&self) -> Result<*mut TfLiteTensor> {
        let t = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!t.is_null(), "no input tensor");
        Ok(t)
    }

    fn output(&self) -> Result<*const TfLiteTensor> {
        let t = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!t.is_null(), "no output tensor 0");
        Ok(t)
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
        }
        #[cfg(feature = "vision-coral")]
        unsafe {
            if let Some(d) = self.delegate {
                edgetpu_free_delegate(d);
            }
        }
    }
}

/// TFLite detector with a small pool of interpreters over one loaded model.
///
/// Tiles are handed to interpreters round-robin; a tile waits only when its
/// interpreter is busy with another tile.
pub struct TfliteDetector {
    cfg: DetectorConfig,
    model: *mut TfLiteModel,
    pool: Vec<Mutex<Interpreter>>,
    next: AtomicUsize,
}

unsafe impl Send for TfliteDetector {}
unsafe impl Sync for TfliteDetector {}

impl TfliteDetector {
    pub fn new(cfg: DetectorConfig) -> Result<Self> {
        #[cfg(not(feature = "vision-coral"))]
        if cfg.use_coral {
            anyhow::bail!("detector.use_coral=true but binary not built with --features vision-coral");
        }
        anyhow::ensure!(!cfg.class_names.is_empty(), "detector.class_names is empty");

        let model_path = cfg.active_model_path().to_string();
        let cpath = CString::new(model_path.as_str())?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", model_path);

        let mut instances = cfg.instances.max(1);
        if cfg.use_coral && instances > 1 {
            warn!("vision: EdgeTPU is a single device, using 1 interpreter instead of {}", instances);
            instances = 1;
        }

        let mut det = Self { cfg, model, pool: Vec::with_capacity(instances), next: AtomicUsize::new(0) };
        for _ in 0..instances {
            let slot = Interpreter::create(det.model, &det.cfg)?;
            det.pool.push(Mutex::new(slot));
        }

        info!(
            "vision: loaded TFLite model: {} ({} interpreters x {} threads, coral={})",
            model_path, instances, det.cfg.threads, det.cfg.use_coral
        );
        Ok(det)
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    pub fn inspect(&self) -> Result<String> {
        let slot = self.pool[0].lock().map_err(|_| anyhow!("interpreter 0 poisoned"))?;
        let input = slot.input()?;
        let in_dims = tensor_dims(input);
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };

        let out0 = slot.output()?;
        let out_dims = tensor_dims(out0);
        let out_bytes = unsafe { TfLiteTensorByteSize(out0) };

        Ok(format!(
            "TFLite inspect:\n- input[0] dims={:?} bytes={}\n- output[0] dims={:?} bytes={}\n- expected stride={} ({} classes)\n",
            in_dims, in_bytes, out_dims, out_bytes, 5 + self.cfg.class_names.len(), self.cfg.class_names.len()
        ))
    }

    fn run(&self, slot: &Interpreter, tile: &RgbImage) -> Result<Vec<RawDetection>> {
        let resized = image::imageops::resize(tile, self.cfg.img_w, self.cfg.img_h, FilterType::Triangle);

        // assumes u8 RGB input (quant/edgetpu-friendly)
        let input = slot.input()?;
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let in_ptr = unsafe { TfLiteTensorData(input) as *mut u8 };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");

        let need = (self.cfg.img_w * self.cfg.img_h * 3) as usize;
        anyhow::ensure!(in_bytes >= need, "input tensor too small: {} < {}", in_bytes, need);
        unsafe { ptr::copy_nonoverlapping(resized.as_raw().as_ptr(), in_ptr, need); }

        let rc = unsafe { TfLiteInterpreterInvoke(slot.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        let out = slot.output()?;
        let out_dims = tensor_dims(out);
        let (num_preds, stride) = match out_dims.as_slice() {
            [1, n, s] => (*n as usize, *s as usize),
            [n, s] => (*n as usize, *s as usize),
            other => anyhow::bail!(
                "unexpected output dims {:?}. Run `stocktake vision inspect` and set detector.output_layout accordingly.",
                other
            ),
        };

        let expected_stride = 5 + self.cfg.class_names.len();
        anyhow::ensure!(
            stride == expected_stride,
            "stride mismatch: got {}, expected {}. output dims {:?}. Check detector.class_names.",
            stride, expected_stride, out_dims
        );

        let out_ptr = unsafe { TfLiteTensorData(out) as *const f32 };
        anyhow::ensure!(!out_ptr.is_null(), "null output tensor data");
        let out_bytes = unsafe { TfLiteTensorByteSize(out) };
        let out_len = out_bytes / std::mem::size_of::<f32>();
        let raw = unsafe { std::slice::from_raw_parts(out_ptr, out_len) };

        let dets = match self.cfg.output_layout.as_str() {
            "ultralytics" => decode_ultralytics(
                raw,
                num_preds,
                &self.cfg.class_names,
                self.cfg.conf_threshold,
                tile.width(),
                tile.height(),
            ),
            other => anyhow::bail!(
                "unsupported output_layout: {} (dims={:?}). Run `stocktake vision inspect` to view tensors.",
                other, out_dims
            ),
        };

        Ok(nms_filter(dets, self.cfg.nms_iou_threshold, self.cfg.max_detections))
    }
}

impl Detector for TfliteDetector {
    fn predict(&self, tile: &RgbImage) -> Result<Vec<RawDetection>> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        let slot = self.pool[i].lock().map_err(|_| anyhow!("interpreter {} poisoned", i))?;
        self.run(&slot, tile)
    }

    fn name(&self) -> &str {
        if self.cfg.use_coral { "tflite-edgetpu" } else { "tflite" }
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        let mut v = Vec::with_capacity(nd as usize);
        for i in 0..nd { v.push(TfLiteTensorDim(t, i)); }
        v
    }
}

impl Drop for TfliteDetector {
    fn drop(&mut self) {
        // Interpreters hold the model; release them first.
        self.pool.clear();
        unsafe {
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
    }
}
