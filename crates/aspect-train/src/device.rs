//! Device selection from the `--gpu` selector: GPU ordinal or `cpu`.

use candle_core::Device;

/// Select the compute device for `selector`.
///
/// `cpu` (or an empty selector) always gives the CPU. A numeric selector picks
/// that CUDA device when compiled with the `cuda` feature, then Metal when
/// compiled with `metal`, and otherwise falls back to CPU.
pub fn select_device(selector: &str) -> Device {
    let selector = selector.trim();
    if selector.is_empty() || selector.eq_ignore_ascii_case("cpu") {
        return Device::Cpu;
    }
    let Ok(ordinal) = selector.parse::<usize>() else {
        tracing::warn!(selector, "Unrecognised device selector, using CPU");
        return Device::Cpu;
    };

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(ordinal) {
            tracing::info!(ordinal, "Using CUDA device");
            return device;
        }
        tracing::warn!(ordinal, "CUDA feature enabled but device unavailable, falling back");
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(ordinal) {
            tracing::info!(ordinal, "Using Metal device");
            return device;
        }
        tracing::warn!(ordinal, "Metal feature enabled but device unavailable, falling back");
    }

    tracing::debug!(ordinal, "No GPU backend compiled in, using CPU");
    Device::Cpu
}
