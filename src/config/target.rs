/// All threads of all processes on the given CPU (or all CPUs).
#[derive(Clone, Copy, Debug)]
pub struct All;

/// A single CPU core.
#[derive(Clone, Copy, Debug)]
pub struct Cpu(pub u32);

impl Cpu {
    pub const ALL: All = All;
}

/// A single process or thread, by TID/PID.
#[derive(Clone, Copy, Debug)]
pub struct Proc(pub u32);

impl Proc {
    pub const ALL: All = All;
    pub const CURRENT: Proc = Proc(0);
}

/// Resolved `(pid, cpu)` pair passed to `perf_event_open`.
#[derive(Clone, Copy, Debug)]
pub struct Target {
    pub(crate) pid: i32,
    pub(crate) cpu: i32,
}

macro_rules! into_target {
    ($ty:ty, $destruct:tt, $pid:expr, $cpu:expr) => {
        impl From<$ty> for Target {
            fn from($destruct: $ty) -> Self {
                Target {
                    pid: $pid as _,
                    cpu: $cpu as _,
                }
            }
        }
    };
}

impl From<Proc> for Target {
    fn from(Proc(pid): Proc) -> Self {
        Target { pid: pid as _, cpu: -1 }
    }
}

impl From<Cpu> for Target {
    fn from(Cpu(cpu): Cpu) -> Self {
        Target { pid: -1, cpu: cpu as _ }
    }
}

into_target!((Proc, Cpu), (Proc(pid), Cpu(cpu)), pid, cpu);
into_target!((Cpu, Proc), (Cpu(cpu), Proc(pid)), pid, cpu);
into_target!((Proc, All), (Proc(pid), _), pid, -1);
into_target!((All, Proc), (_, Proc(pid)), pid, -1);
into_target!((Cpu, All), (Cpu(cpu), _), -1, cpu);
into_target!((All, Cpu), (_, Cpu(cpu)), -1, cpu);
