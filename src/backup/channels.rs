// rman-backup/src/backup/channels.rs
use crate::backup::plan::Directive;
use crate::config::Device;

/// `ALLOCATE CHANNEL CH1..CHn`, in order. Tape channels carry the media
/// manager environment as `PARMS`.
pub fn allocate(count: u32, device: &Device) -> Vec<Directive> {
    let parms = match device {
        Device::Tape { env } => Some(env.clone()),
        Device::Disk { .. } => None,
    };
    (1..=count)
        .map(|index| Directive::AllocateChannel {
            index,
            device_type: device.device_type(),
            parms: parms.clone(),
        })
        .collect()
}

/// `RELEASE CHANNEL CH1..CHn`, same order as [`allocate`].
pub fn release(count: u32) -> Vec<Directive> {
    (1..=count).map(|index| Directive::ReleaseChannel { index }).collect()
}
