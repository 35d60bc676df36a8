//! Built-in model table.
//!
//! Limits are conservative datasheet values. Deployments tighten them through
//! [`OverrideTable`](crate::OverrideTable) rather than editing this file.

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use crate::types::{Brand, FirmwareVersion, LimitKind, MitRanges, ModelInfo, UnitScales};

/// 0.229 rpm per raw unit, in rad/s.
const DXL_VELOCITY_UNIT: f64 = 0.229 * TAU / 60.0;

#[derive(Clone, Copy)]
struct Limits {
    temp: (f64, f64),
    volt: (f64, f64),
    current: (f64, f64),
}

impl Limits {
    fn table(&self) -> BTreeMap<LimitKind, f64> {
        BTreeMap::from([
            (LimitKind::TempWarning, self.temp.0),
            (LimitKind::TempCritical, self.temp.1),
            (LimitKind::VoltageMin, self.volt.0),
            (LimitKind::VoltageMax, self.volt.1),
            (LimitKind::CurrentMax, self.current.0),
            (LimitKind::CurrentPeak, self.current.1),
        ])
    }
}

fn serial_servo(
    brand: Brand,
    model: &str,
    variant: Option<&str>,
    numbers: &[u32],
    resolution: u32,
    units: UnitScales,
    limits: Limits,
) -> ModelInfo {
    ModelInfo {
        brand,
        model: model.to_string(),
        variant: variant.map(str::to_string),
        model_numbers: numbers.to_vec(),
        firmware: None,
        resolution,
        position_scale: Some(TAU / f64::from(resolution)),
        limits: limits.table(),
        units,
        mit: None,
    }
}

fn feetech_units(resolution: u32, current_ma: Option<f64>) -> UnitScales {
    UnitScales {
        velocity: Some(TAU / f64::from(resolution)),
        current_ma,
        ..UnitScales::default()
    }
}

fn dxl_units(current_ma: Option<f64>) -> UnitScales {
    UnitScales {
        velocity: Some(DXL_VELOCITY_UNIT),
        current_ma,
        ..UnitScales::default()
    }
}

fn damiao(
    model: &str,
    variant: Option<&str>,
    (p_max, v_max, t_max): (f32, f32, f32),
    torque_constant: f64,
    volt: (f64, f64),
    current: (f64, f64),
) -> ModelInfo {
    ModelInfo {
        brand: Brand::Damiao,
        model: model.to_string(),
        variant: variant.map(str::to_string),
        model_numbers: Vec::new(),
        firmware: None,
        resolution: 1 << 16,
        position_scale: None,
        limits: Limits {
            temp: (70.0, 80.0),
            volt,
            current,
        }
        .table(),
        units: UnitScales {
            torque_constant: Some(torque_constant),
            ..UnitScales::default()
        },
        mit: Some(MitRanges {
            p_max,
            v_max,
            t_max,
        }),
    }
}

pub(crate) fn builtin_models() -> Vec<ModelInfo> {
    let sts_7v = Limits {
        temp: (60.0, 70.0),
        volt: (4.5, 8.4),
        current: (1_500.0, 2_700.0),
    };
    let sts3215 = serial_servo(
        Brand::Feetech,
        "sts3215",
        None,
        &[777, 0x0C8F],
        4096,
        feetech_units(4096, Some(6.5)),
        sts_7v,
    );

    let mut c001 = sts3215.clone();
    c001.variant = Some("c001".into());
    c001.firmware = Some(FirmwareVersion { major: 3, minor: 6 });

    let mut c018 = sts3215.clone();
    c018.variant = Some("c018".into());
    c018.firmware = Some(FirmwareVersion { major: 3, minor: 9 });
    c018.limits = Limits {
        temp: (60.0, 70.0),
        volt: (9.0, 12.6),
        current: (2_000.0, 3_000.0),
    }
    .table();

    let mut c046 = sts3215.clone();
    c046.variant = Some("c046".into());
    c046.firmware = Some(FirmwareVersion {
        major: 3,
        minor: 10,
    });

    let dxl_3v = Limits {
        temp: (60.0, 70.0),
        volt: (3.7, 6.0),
        current: (1_200.0, 1_750.0),
    };
    let dxl_12v = Limits {
        temp: (65.0, 72.0),
        volt: (10.0, 14.8),
        current: (2_300.0, 4_100.0),
    };

    vec![
        sts3215,
        c001,
        c018,
        c046,
        serial_servo(
            Brand::Feetech,
            "sts3250",
            None,
            &[2825],
            4096,
            feetech_units(4096, Some(6.5)),
            Limits {
                temp: (60.0, 70.0),
                volt: (9.0, 12.6),
                current: (2_500.0, 4_000.0),
            },
        ),
        serial_servo(
            Brand::Feetech,
            "scs0009",
            None,
            &[1284],
            1024,
            feetech_units(1024, None),
            Limits {
                temp: (60.0, 70.0),
                volt: (4.0, 7.4),
                current: (800.0, 1_200.0),
            },
        ),
        serial_servo(
            Brand::Feetech,
            "sm8512bl",
            None,
            &[11272],
            4096,
            feetech_units(4096, Some(6.5)),
            Limits {
                temp: (65.0, 75.0),
                volt: (12.0, 25.2),
                current: (4_000.0, 8_000.0),
            },
        ),
        serial_servo(
            Brand::Dynamixel,
            "xl330-m077",
            None,
            &[1190],
            4096,
            dxl_units(Some(1.0)),
            dxl_3v,
        ),
        serial_servo(
            Brand::Dynamixel,
            "xl330-m288",
            None,
            &[1200],
            4096,
            dxl_units(Some(1.0)),
            dxl_3v,
        ),
        serial_servo(
            Brand::Dynamixel,
            "xc330-m288",
            None,
            &[1240],
            4096,
            dxl_units(Some(1.0)),
            dxl_3v,
        ),
        serial_servo(
            Brand::Dynamixel,
            "xl430-w250",
            None,
            &[1060],
            4096,
            dxl_units(None),
            Limits {
                temp: (65.0, 72.0),
                volt: (6.5, 12.0),
                current: (1_400.0, 1_800.0),
            },
        ),
        serial_servo(
            Brand::Dynamixel,
            "xm430-w350",
            None,
            &[1020],
            4096,
            dxl_units(Some(2.69)),
            dxl_12v,
        ),
        serial_servo(
            Brand::Dynamixel,
            "xm430-w210",
            None,
            &[1030],
            4096,
            dxl_units(Some(2.69)),
            dxl_12v,
        ),
        damiao("dm4310", None, (12.5, 30.0, 10.0), 0.945, (15.0, 30.0), (2_500.0, 7_500.0)),
        damiao("dm4310", Some("48v"), (12.5, 50.0, 10.0), 0.945, (30.0, 52.0), (2_500.0, 7_500.0)),
        damiao("dm4340", None, (12.5, 8.0, 28.0), 2.8, (15.0, 30.0), (3_500.0, 10_000.0)),
        damiao("dm4340", Some("48v"), (12.5, 10.0, 28.0), 2.8, (30.0, 52.0), (3_500.0, 10_000.0)),
        damiao("dm6006", None, (12.5, 45.0, 20.0), 1.2, (15.0, 30.0), (6_000.0, 15_000.0)),
        damiao("dm8009", None, (12.5, 45.0, 54.0), 2.1, (15.0, 52.0), (10_000.0, 30_000.0)),
        damiao("dm10010l", None, (12.5, 25.0, 200.0), 5.8, (30.0, 52.0), (15_000.0, 40_000.0)),
        damiao("dm3507", None, (12.5, 50.0, 5.0), 0.37, (15.0, 30.0), (1_500.0, 4_500.0)),
        damiao("dmh3510", None, (12.5, 280.0, 1.0), 0.045, (15.0, 30.0), (2_000.0, 6_000.0)),
    ]
}
