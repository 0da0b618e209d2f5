pub mod pagemap;

use std::io::Read;

/// Capability queries about the environment a session runs in.
pub trait Platform {
    /// Returns true when running at the most privileged level (ring 0).
    fn is_privileged(&self) -> bool;

    /// Returns true when running as a guest under a hypervisor.
    fn is_virtualized(&self) -> bool;
}

/// The host we're actually running on.
pub struct HostPlatform;
impl Platform for HostPlatform {
    fn is_privileged(&self) -> bool {
        MemdupeEnv::current_privilege_level() == Some(MemdupeEnv::CPL_KERNEL)
    }
    fn is_virtualized(&self) -> bool {
        MemdupeEnv::procfs_hypervisor().unwrap_or(false)
    }
}

/// State of the KSM daemon (`/sys/kernel/mm/ksm/run`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KsmRun {
    /// Stop scanning, keep merged pages.
    Stopped,
    /// Scan and merge.
    Running,
    /// Stop scanning and unmerge everything.
    Unmerge,
}
impl KsmRun {
    pub fn value(&self) -> u64 {
        match self {
            Self::Stopped => 0,
            Self::Running => 1,
            Self::Unmerge => 2,
        }
    }
    pub fn from_value(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::Stopped),
            1 => Some(Self::Running),
            2 => Some(Self::Unmerge),
            _ => None,
        }
    }
}

/// Utilities for inspecting the state of the host.
pub struct MemdupeEnv;
impl MemdupeEnv {
    const CPUINFO_PATH: &'static str = "/proc/cpuinfo";
    const KSM_PATH: &'static str = "/sys/kernel/mm/ksm";

    pub const CPL_KERNEL: u8 = 0;
    pub const CPL_USER: u8 = 3;

    fn read_to_string(path: &str) -> Result<String, std::io::ErrorKind> {
        let mut f = std::fs::File::open(path).map_err(|e| e.kind())?;
        let mut res = String::new();
        f.read_to_string(&mut res).map_err(|e| e.kind())?;
        Ok(res)
    }

    /// Returns true if any line of `cpuinfo` lists the 'hypervisor' flag.
    pub fn cpuinfo_has_hypervisor(cpuinfo: &str) -> bool {
        cpuinfo.lines()
            .filter(|l| l.starts_with("flags"))
            .any(|l| l.split_whitespace().any(|w| w == "hypervisor"))
    }

    /// Returns true if the CPU advertises that we're running under a
    /// hypervisor.
    pub fn procfs_hypervisor() -> Result<bool, std::io::ErrorKind> {
        let s = Self::read_to_string(Self::CPUINFO_PATH)?;
        Ok(Self::cpuinfo_has_hypervisor(&s))
    }

    /// Return the current privilege level (the low bits of CS).
    #[cfg(target_arch = "x86_64")]
    pub fn current_privilege_level() -> Option<u8> {
        let cs: u16;
        unsafe {
            core::arch::asm!("mov {0:x}, cs", out(reg) cs,
                options(nomem, nostack, preserves_flags));
        }
        Some((cs & 0b11) as u8)
    }

    #[cfg(not(target_arch = "x86_64"))]
    pub fn current_privilege_level() -> Option<u8> { None }

    /// Read one of the numeric knobs in `/sys/kernel/mm/ksm`.
    pub fn sysfs_ksm(knob: &str) -> Result<u64, std::io::ErrorKind> {
        let path = format!("{}/{}", Self::KSM_PATH, knob);
        let s = Self::read_to_string(&path)?;
        s.trim().parse().map_err(|_| std::io::ErrorKind::InvalidData)
    }

    /// Returns the state of the KSM daemon.
    pub fn sysfs_ksm_run() -> Result<KsmRun, std::io::ErrorKind> {
        let v = Self::sysfs_ksm("run")?;
        KsmRun::from_value(v).ok_or(std::io::ErrorKind::InvalidData)
    }

    /// Number of shared KSM pages in use.
    pub fn sysfs_ksm_pages_shared() -> Result<u64, std::io::ErrorKind> {
        Self::sysfs_ksm("pages_shared")
    }

    /// Number of sites sharing KSM pages.
    pub fn sysfs_ksm_pages_sharing() -> Result<u64, std::io::ErrorKind> {
        Self::sysfs_ksm("pages_sharing")
    }

    /// Number of pages scanned before the KSM daemon goes to sleep.
    pub fn sysfs_ksm_pages_to_scan() -> Result<u64, std::io::ErrorKind> {
        Self::sysfs_ksm("pages_to_scan")
    }

    /// Milliseconds the KSM daemon sleeps between scans.
    pub fn sysfs_ksm_sleep_millisecs() -> Result<u64, std::io::ErrorKind> {
        Self::sysfs_ksm("sleep_millisecs")
    }

    /// Start/stop the KSM daemon. Requires root.
    pub fn sysfs_ksm_run_set(run: KsmRun) -> Result<(), std::io::ErrorKind> {
        use std::io::Write;
        let path = format!("{}/run", Self::KSM_PATH);
        let mut f = std::fs::File::options().write(true).open(path)
            .map_err(|e| e.kind())?;
        f.write_all(run.value().to_string().as_bytes()).map_err(|e| e.kind())?;
        Ok(())
    }

    /// Pin to a particular core.
    pub fn pin_to_core(core: usize) -> Result<(), String> {
        let this_pid = nix::unistd::Pid::from_raw(0);
        let mut cpuset = nix::sched::CpuSet::new();
        cpuset.set(core).map_err(|e| {
            format!("core {} out of range: {}", core, e.desc())
        })?;
        nix::sched::sched_setaffinity(this_pid, &cpuset).map_err(|e| {
            format!("couldn't pin to core {}: {}", core, e.desc())
        })
    }

    /// The system page size.
    pub fn page_size() -> Option<usize> {
        nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
            .ok().flatten().map(|v| v as usize)
    }
}
