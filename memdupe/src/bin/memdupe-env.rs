
use memdupe::{ HostPlatform, KsmRun, MemdupeEnv, Platform };
use std::io::ErrorKind;

fn knob(res: Result<u64, ErrorKind>) -> String {
    match res {
        Ok(v) => v.to_string(),
        Err(ErrorKind::NotFound) => "<missing; kernel built without KSM?>".to_string(),
        Err(ErrorKind::PermissionDenied) => "<read error; are you root?>".to_string(),
        Err(e) => format!("<{:?}>", e),
    }
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn")
    ).init();

    let num_cores = nix::unistd::sysconf(
        nix::unistd::SysconfVar::_NPROCESSORS_ONLN
    ).ok().flatten().unwrap_or(0);

    let platform = HostPlatform;
    if platform.is_privileged() {
        log::warn!("Running at CPL 0");
    }
    let virt = match platform.is_virtualized() {
        true => "guest (hypervisor present)",
        false => "host",
    };
    let cpl = match MemdupeEnv::current_privilege_level() {
        Some(MemdupeEnv::CPL_KERNEL) => "0 (kernel) [!!]".to_string(),
        Some(MemdupeEnv::CPL_USER) => "3 (user)".to_string(),
        Some(x) => format!("{}", x),
        None => "<unknown>".to_string(),
    };
    let page_size = match MemdupeEnv::page_size() {
        Some(ps) => ps.to_string(),
        None => "<unknown>".to_string(),
    };

    let run = match MemdupeEnv::sysfs_ksm_run() {
        Ok(KsmRun::Running) => "running".to_string(),
        Ok(KsmRun::Stopped) => "stopped [!!]".to_string(),
        Ok(KsmRun::Unmerge) => "unmerging [!!]".to_string(),
        Err(ErrorKind::NotFound) => "<missing; kernel built without KSM?>".to_string(),
        Err(e) => format!("<{:?}>", e),
    };

    println!("[*] 'memdupe' environment summary:");
    println!("  {:<40}: {}", "online cores", num_cores);
    println!("  {:<40}: {}", "virtualization", virt);
    println!("  {:<40}: {}", "current privilege level", cpl);
    println!("  {:<40}: {}", "page size", page_size);
    println!("  {:<40}: {}", "ksm run", run);
    println!("  {:<40}: {}", "ksm pages_to_scan",
        knob(MemdupeEnv::sysfs_ksm_pages_to_scan()));
    println!("  {:<40}: {}", "ksm sleep_millisecs",
        knob(MemdupeEnv::sysfs_ksm_sleep_millisecs()));
    println!("  {:<40}: {}", "ksm pages_shared",
        knob(MemdupeEnv::sysfs_ksm_pages_shared()));
    println!("  {:<40}: {}", "ksm pages_sharing",
        knob(MemdupeEnv::sysfs_ksm_pages_sharing()));
}
