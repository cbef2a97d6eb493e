//! OCI seccomp policy compiled to BPF with `seccompiler`.
//!
//! Each distinct non-default action becomes its own filter that matches
//! the listed syscalls and allows everything else. A final filter applies
//! the default action to anything not listed. The kernel runs every
//! installed filter and keeps the highest-precedence verdict, which gives
//! the same result as a single libseccomp filter.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use rootcell_common::spec::{
    LinuxSeccomp, LinuxSeccompArg, SeccompAction, SeccompOperator,
};
use seccompiler::{
    BpfProgram, SeccompAction as BpfAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition,
    SeccompFilter, SeccompRule, TargetArch,
};
use thiserror::Error;

/// Errors from compiling or loading a seccomp policy.
#[derive(Debug, Error)]
pub enum SeccompError {
    /// The policy uses an action that cannot be expressed as BPF here.
    #[error("unsupported seccomp action {action:?}")]
    UnsupportedAction {
        /// The offending action.
        action: SeccompAction,
    },

    /// The running architecture has no BPF backend.
    #[error("unsupported architecture {arch}")]
    UnsupportedArchitecture {
        /// `std::env::consts::ARCH`.
        arch: &'static str,
    },

    /// Filter construction or compilation failed.
    #[error("error building seccomp filter: {0}")]
    Build(#[from] seccompiler::BackendError),

    /// Loading the filter into the kernel failed.
    #[error("error loading seccomp filter: {0}")]
    Load(#[from] seccompiler::Error),
}

macro_rules! syscall_entries {
    ($($name:ident),* $(,)?) => {
        &[$((stringify!($name), libc::$name)),*]
    };
}

const COMMON_SYSCALLS: &[(&str, libc::c_long)] = syscall_entries![
    SYS_read, SYS_write, SYS_close, SYS_fstat, SYS_lseek, SYS_mmap, SYS_mprotect, SYS_munmap,
    SYS_brk, SYS_rt_sigaction, SYS_rt_sigprocmask, SYS_rt_sigreturn, SYS_ioctl, SYS_pread64,
    SYS_pwrite64, SYS_readv, SYS_writev, SYS_sched_yield, SYS_mremap, SYS_msync, SYS_mincore,
    SYS_madvise, SYS_shmget, SYS_shmat, SYS_shmctl, SYS_dup, SYS_dup3, SYS_nanosleep,
    SYS_getitimer, SYS_setitimer, SYS_getpid, SYS_sendfile, SYS_socket, SYS_connect, SYS_accept,
    SYS_sendto, SYS_recvfrom, SYS_sendmsg, SYS_recvmsg, SYS_shutdown, SYS_bind, SYS_listen,
    SYS_getsockname, SYS_getpeername, SYS_socketpair, SYS_setsockopt, SYS_getsockopt, SYS_clone,
    SYS_execve, SYS_exit, SYS_wait4, SYS_kill, SYS_uname, SYS_semget, SYS_semop, SYS_semctl,
    SYS_shmdt, SYS_msgget, SYS_msgsnd, SYS_msgrcv, SYS_msgctl, SYS_fcntl, SYS_flock, SYS_fsync,
    SYS_fdatasync, SYS_truncate, SYS_ftruncate, SYS_getcwd, SYS_chdir, SYS_fchdir, SYS_fchmod,
    SYS_fchown, SYS_umask, SYS_gettimeofday, SYS_getrlimit, SYS_getrusage, SYS_sysinfo, SYS_times,
    SYS_ptrace, SYS_getuid, SYS_syslog, SYS_getgid, SYS_setuid, SYS_setgid, SYS_geteuid,
    SYS_getegid, SYS_setpgid, SYS_getppid, SYS_setsid, SYS_setreuid, SYS_setregid, SYS_getgroups,
    SYS_setgroups, SYS_setresuid, SYS_getresuid, SYS_setresgid, SYS_getresgid, SYS_getpgid,
    SYS_setfsuid, SYS_setfsgid, SYS_getsid, SYS_capget, SYS_capset, SYS_rt_sigpending,
    SYS_rt_sigtimedwait, SYS_rt_sigqueueinfo, SYS_rt_sigsuspend, SYS_sigaltstack, SYS_personality,
    SYS_statfs, SYS_fstatfs, SYS_getpriority, SYS_setpriority, SYS_sched_setparam,
    SYS_sched_getparam, SYS_sched_setscheduler, SYS_sched_getscheduler,
    SYS_sched_get_priority_max, SYS_sched_get_priority_min, SYS_sched_rr_get_interval, SYS_mlock,
    SYS_munlock, SYS_mlockall, SYS_munlockall, SYS_vhangup, SYS_pivot_root, SYS_prctl,
    SYS_adjtimex, SYS_setrlimit, SYS_chroot, SYS_sync, SYS_acct, SYS_settimeofday, SYS_mount,
    SYS_umount2, SYS_swapon, SYS_swapoff, SYS_reboot, SYS_sethostname, SYS_setdomainname,
    SYS_init_module, SYS_delete_module, SYS_quotactl, SYS_gettid, SYS_readahead, SYS_setxattr,
    SYS_lsetxattr, SYS_fsetxattr, SYS_getxattr, SYS_lgetxattr, SYS_fgetxattr, SYS_listxattr,
    SYS_llistxattr, SYS_flistxattr, SYS_removexattr, SYS_lremovexattr, SYS_fremovexattr,
    SYS_tkill, SYS_futex, SYS_sched_setaffinity, SYS_sched_getaffinity, SYS_io_setup,
    SYS_io_destroy, SYS_io_getevents, SYS_io_submit, SYS_io_cancel, SYS_remap_file_pages,
    SYS_getdents64, SYS_set_tid_address, SYS_restart_syscall, SYS_semtimedop, SYS_fadvise64,
    SYS_timer_create, SYS_timer_settime, SYS_timer_gettime, SYS_timer_getoverrun,
    SYS_timer_delete, SYS_clock_settime, SYS_clock_gettime, SYS_clock_getres,
    SYS_clock_nanosleep, SYS_exit_group, SYS_epoll_ctl, SYS_tgkill, SYS_mbind,
    SYS_set_mempolicy, SYS_get_mempolicy, SYS_mq_open, SYS_mq_unlink, SYS_mq_timedsend,
    SYS_mq_timedreceive, SYS_mq_notify, SYS_mq_getsetattr, SYS_kexec_load, SYS_waitid,
    SYS_add_key, SYS_request_key, SYS_keyctl, SYS_ioprio_set, SYS_ioprio_get,
    SYS_inotify_add_watch, SYS_inotify_rm_watch, SYS_migrate_pages, SYS_openat, SYS_mkdirat,
    SYS_mknodat, SYS_fchownat, SYS_newfstatat, SYS_unlinkat, SYS_linkat, SYS_symlinkat,
    SYS_readlinkat, SYS_fchmodat, SYS_faccessat, SYS_pselect6, SYS_ppoll, SYS_unshare,
    SYS_set_robust_list, SYS_get_robust_list, SYS_splice, SYS_tee, SYS_sync_file_range,
    SYS_vmsplice, SYS_move_pages, SYS_utimensat, SYS_epoll_pwait, SYS_signalfd4,
    SYS_timerfd_create, SYS_eventfd2, SYS_fallocate, SYS_timerfd_settime, SYS_timerfd_gettime,
    SYS_accept4, SYS_epoll_create1, SYS_pipe2, SYS_inotify_init1, SYS_preadv, SYS_pwritev,
    SYS_rt_tgsigqueueinfo, SYS_perf_event_open, SYS_recvmmsg, SYS_fanotify_init,
    SYS_fanotify_mark, SYS_prlimit64, SYS_name_to_handle_at, SYS_open_by_handle_at,
    SYS_clock_adjtime, SYS_syncfs, SYS_sendmmsg, SYS_setns, SYS_getcpu, SYS_process_vm_readv,
    SYS_process_vm_writev, SYS_kcmp, SYS_finit_module, SYS_sched_setattr, SYS_sched_getattr,
    SYS_renameat2, SYS_seccomp, SYS_getrandom, SYS_memfd_create, SYS_bpf, SYS_execveat,
    SYS_userfaultfd, SYS_membarrier, SYS_mlock2, SYS_copy_file_range, SYS_preadv2, SYS_pwritev2,
    SYS_statx, SYS_rseq, SYS_pidfd_send_signal, SYS_io_uring_setup,
    SYS_io_uring_enter, SYS_io_uring_register, SYS_open_tree, SYS_move_mount, SYS_fsopen,
    SYS_fsconfig, SYS_fsmount, SYS_fspick, SYS_pidfd_open, SYS_clone3, SYS_close_range,
    SYS_openat2, SYS_pidfd_getfd, SYS_faccessat2, SYS_process_madvise,
];

#[cfg(target_arch = "x86_64")]
const ARCH_SYSCALLS: &[(&str, libc::c_long)] = syscall_entries![
    SYS_open, SYS_stat, SYS_lstat, SYS_poll, SYS_access, SYS_pipe, SYS_select, SYS_dup2,
    SYS_pause, SYS_alarm, SYS_fork, SYS_vfork, SYS_getdents, SYS_rename, SYS_mkdir, SYS_rmdir,
    SYS_creat, SYS_link, SYS_unlink, SYS_symlink, SYS_readlink, SYS_chmod, SYS_chown, SYS_lchown,
    SYS_getpgrp, SYS_utime, SYS_mknod, SYS_ustat, SYS_sysfs, SYS_arch_prctl, SYS_modify_ldt,
    SYS_iopl, SYS_ioperm, SYS_time, SYS_epoll_create, SYS_epoll_wait, SYS_inotify_init,
    SYS_signalfd, SYS_eventfd, SYS_futimesat, SYS_utimes, SYS_renameat,
];

#[cfg(not(target_arch = "x86_64"))]
const ARCH_SYSCALLS: &[(&str, libc::c_long)] = &[];

/// Looks up a syscall number by name for the running architecture.
pub fn syscall_number(name: &str) -> Option<i64> {
    static TABLE: OnceLock<HashMap<&'static str, i64>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            COMMON_SYSCALLS
                .iter()
                .chain(ARCH_SYSCALLS)
                .map(|&(name, nr)| (name.trim_start_matches("SYS_"), i64::from(nr)))
                .collect()
        })
        .get(name)
        .copied()
}

fn bpf_action(
    action: SeccompAction,
    errno_ret: Option<u32>,
    default_errno_ret: Option<u32>,
) -> Result<BpfAction, SeccompError> {
    #[allow(clippy::cast_sign_loss)]
    let errno = errno_ret.or(default_errno_ret).unwrap_or(libc::EPERM as u32);
    Ok(match action {
        SeccompAction::Kill | SeccompAction::KillThread => BpfAction::KillThread,
        SeccompAction::KillProcess => BpfAction::KillProcess,
        SeccompAction::Trap => BpfAction::Trap,
        SeccompAction::Errno => BpfAction::Errno(errno),
        SeccompAction::Trace => BpfAction::Trace(errno),
        SeccompAction::Allow => BpfAction::Allow,
        SeccompAction::Log => BpfAction::Log,
        SeccompAction::Notify => return Err(SeccompError::UnsupportedAction { action }),
    })
}

fn condition(arg: &LinuxSeccompArg) -> Result<SeccompCondition, SeccompError> {
    let (op, value) = match arg.op {
        SeccompOperator::NotEqual => (SeccompCmpOp::Ne, arg.value),
        SeccompOperator::LessThan => (SeccompCmpOp::Lt, arg.value),
        SeccompOperator::LessOrEqual => (SeccompCmpOp::Le, arg.value),
        SeccompOperator::Equal => (SeccompCmpOp::Eq, arg.value),
        SeccompOperator::GreaterOrEqual => (SeccompCmpOp::Ge, arg.value),
        SeccompOperator::GreaterThan => (SeccompCmpOp::Gt, arg.value),
        SeccompOperator::MaskedEqual => (SeccompCmpOp::MaskedEq(arg.value), arg.value_two),
    };
    Ok(SeccompCondition::new(arg.index, SeccompCmpArgLen::Qword, op, value)?)
}

fn rule(args: &[LinuxSeccompArg]) -> Result<Option<SeccompRule>, SeccompError> {
    if args.is_empty() {
        return Ok(None);
    }
    let conditions = args.iter().map(condition).collect::<Result<Vec<_>, _>>()?;
    Ok(Some(SeccompRule::new(conditions)?))
}

// An unconditional entry for a syscall overrides any conditional ones.
#[derive(Default)]
struct RuleSet {
    conditional: BTreeMap<i64, Vec<SeccompRule>>,
    unconditional: BTreeSet<i64>,
}

impl RuleSet {
    fn add(&mut self, nr: i64, rule: Option<SeccompRule>) {
        match rule {
            Some(rule) => self.conditional.entry(nr).or_default().push(rule),
            None => {
                let _ = self.unconditional.insert(nr);
            }
        }
    }

    fn into_rules(mut self) -> BTreeMap<i64, Vec<SeccompRule>> {
        for nr in self.unconditional {
            let _ = self.conditional.insert(nr, Vec::new());
        }
        self.conditional
    }
}

/// Compiles `seccomp` into the BPF programs to install, in order.
///
/// Syscall names unknown on this architecture are skipped.
///
/// # Errors
///
/// Returns [`SeccompError::UnsupportedAction`] for `SCMP_ACT_NOTIFY` and
/// [`SeccompError::Build`] if `seccompiler` rejects a rule.
pub fn compile(seccomp: &LinuxSeccomp, arch: TargetArch) -> Result<Vec<BpfProgram>, SeccompError> {
    let default = bpf_action(seccomp.default_action, seccomp.default_errno_ret, None)?;
    let mut groups: Vec<(BpfAction, RuleSet)> = Vec::new();
    let mut listed = RuleSet::default();

    for syscall in &seccomp.syscalls {
        let action = bpf_action(syscall.action, syscall.errno_ret, seccomp.default_errno_ret)?;
        if action == default {
            continue;
        }
        for name in &syscall.names {
            let Some(nr) = syscall_number(name) else {
                tracing::debug!(syscall = %name, "unknown syscall, skipping");
                continue;
            };
            listed.add(nr, rule(&syscall.args)?);
            if action == BpfAction::Allow {
                continue;
            }
            let index = match groups.iter().position(|(a, _)| *a == action) {
                Some(index) => index,
                None => {
                    groups.push((action.clone(), RuleSet::default()));
                    groups.len() - 1
                }
            };
            groups[index].1.add(nr, rule(&syscall.args)?);
        }
    }

    let mut programs = Vec::with_capacity(groups.len() + 1);
    for (action, rules) in groups {
        let filter = SeccompFilter::new(rules.into_rules(), BpfAction::Allow, action, arch)?;
        let program: BpfProgram = filter.try_into()?;
        programs.push(program);
    }
    if default != BpfAction::Allow {
        let filter = SeccompFilter::new(listed.into_rules(), default, BpfAction::Allow, arch)?;
        let program: BpfProgram = filter.try_into()?;
        programs.push(program);
    }
    Ok(programs)
}

/// Compiles `seccomp` for the running architecture and loads it on the
/// calling thread.
///
/// # Errors
///
/// Returns any compilation error and [`SeccompError::Load`] if the kernel
/// rejects a program.
pub fn apply(seccomp: &LinuxSeccomp) -> Result<(), SeccompError> {
    let arch = TargetArch::try_from(std::env::consts::ARCH).map_err(|_| {
        SeccompError::UnsupportedArchitecture {
            arch: std::env::consts::ARCH,
        }
    })?;
    let programs = compile(seccomp, arch)?;
    for program in &programs {
        seccompiler::apply_filter(program)?;
    }
    tracing::debug!(filters = programs.len(), "seccomp filter loaded");
    Ok(())
}
