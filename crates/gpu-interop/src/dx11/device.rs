//! D3D11 device used to create and copy shared textures.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP, D3D_FEATURE_LEVEL_11_0,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Query,
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_QUERY_DESC, D3D11_QUERY_EVENT, D3D11_SDK_VERSION,
};
use tracing::{debug, warn};

/// Upper bound on [`Dx11Device::wait_idle`].
const GPU_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

pub struct Dx11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    /// Event query ended after each copy so that copies finish before a
    /// call returns.
    fence: ID3D11Query,
}

fn create_device(
    driver: D3D_DRIVER_TYPE,
) -> windows::core::Result<(Option<ID3D11Device>, Option<ID3D11DeviceContext>)> {
    let mut device = None;
    let mut context = None;
    unsafe {
        D3D11CreateDevice(
            None,
            driver,
            HMODULE::default(),
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&[D3D_FEATURE_LEVEL_11_0]),
            D3D11_SDK_VERSION,
            Some(&mut device as *mut _),
            None,
            Some(&mut context as *mut _),
        )?;
    }
    Ok((device, context))
}

impl Dx11Device {
    /// Hardware device with BGRA support, or WARP where no GPU is present.
    pub fn new() -> Result<Self> {
        let mut last_error = None;
        for driver in [D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP] {
            match create_device(driver) {
                Ok((Some(device), Some(context))) => {
                    debug!("D3D11 device created ({driver:?})");
                    let fence = create_fence(&device)?;
                    return Ok(Self {
                        device,
                        context,
                        fence,
                    });
                }
                Ok(_) => last_error = Some(anyhow!("{driver:?} returned no device")),
                Err(e) => last_error = Some(anyhow::Error::from(e)),
            }
        }
        Err(last_error
            .unwrap_or_else(|| anyhow!("no driver type tried"))
            .context("D3D11CreateDevice failed"))
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    /// Flush and poll the fence until queued work has executed.
    pub fn wait_idle(&self) {
        let start = Instant::now();
        unsafe {
            self.context.End(&self.fence);
            self.context.Flush();
            loop {
                // S_FALSE (pending) maps to Ok; only the written flag counts.
                let mut done: u32 = 0;
                let _ = self.context.GetData(
                    &self.fence,
                    Some(&mut done as *mut u32 as *mut std::ffi::c_void),
                    std::mem::size_of::<u32>() as u32,
                    0,
                );
                if done != 0 {
                    return;
                }
                if start.elapsed() > GPU_WAIT_TIMEOUT {
                    warn!("D3D11 fence not reached after {GPU_WAIT_TIMEOUT:?}");
                    return;
                }
                std::thread::yield_now();
            }
        }
    }
}

fn create_fence(device: &ID3D11Device) -> Result<ID3D11Query> {
    let desc = D3D11_QUERY_DESC {
        Query: D3D11_QUERY_EVENT,
        ..Default::default()
    };
    let mut query = None;
    unsafe { device.CreateQuery(&desc, Some(&mut query as *mut _)) }.context("CreateQuery(EVENT)")?;
    query.context("CreateQuery returned no query")
}
