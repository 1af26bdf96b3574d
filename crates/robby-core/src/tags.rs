//! Names under which published machine state is exported.

#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub key: &'static str,
    pub metric: &'static str,
    pub help: &'static str,
}

pub const MACHINE_STATUS: Tag = Tag {
    key: "status",
    metric: "ttrobby_machine_status",
    help: "Machine status code (0 idle, 1 preparing, 2 playing, 3 paused, 9 stopping, 99 error)",
};

pub const MACHINE_MODE: Tag = Tag {
    key: "mode",
    metric: "ttrobby_machine_mode",
    help: "Machine mode code (0 direct, 1 program, 2 configuration)",
};

pub const BALLS_RELEASED: Tag = Tag {
    key: "balls_released",
    metric: "ttrobby_balls_released_total",
    help: "Balls released by the feeders",
};

pub const SHOTS_SKIPPED: Tag = Tag {
    key: "shots_skipped",
    metric: "ttrobby_shots_skipped_total",
    help: "Shot timer beats skipped because the feeder was still busy",
};

pub const CYCLES_EXECUTED: Tag = Tag {
    key: "cycle_count",
    metric: "ttrobby_cycles_executed_total",
    help: "Controller loop iterations",
};

pub const CYCLES_MISSED: Tag = Tag {
    key: "cycles_missed",
    metric: "ttrobby_cycles_missed_total",
    help: "Controller loop iterations that started late",
};

pub const SHOT_FREQUENCY_HZ: Tag = Tag {
    key: "armed_frequency_hz",
    metric: "ttrobby_shot_frequency_hertz",
    help: "Frequency the shot timer is armed at, zero when disarmed",
};

pub const SHOT_CURSOR: Tag = Tag {
    key: "shot_cursor",
    metric: "ttrobby_shot_cursor",
    help: "Index of the next shot in the program cycle",
};

pub const FEEDER_BUSY: Tag = Tag {
    key: "feeder_busy",
    metric: "ttrobby_feeder_busy",
    help: "1 while any feeder is in its release cycle",
};
