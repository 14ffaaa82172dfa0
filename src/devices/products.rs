//! Per-product capability table, consulted once when a session connects.

use bluest::Uuid;

use super::CharacteristicId;

/// The BLE GATT service that brain-class products (IQ2, EXP, AIM, OneStick) provide
pub const BRAIN_SERVICE: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb13d5);

const BRAIN_ADMIN_TX: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1305);
const BRAIN_ADMIN_RX: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1306);
const BRAIN_USER_TX: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1316);
const BRAIN_USER_RX: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1326);
const BRAIN_LOCK: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb13e5);
const BRAIN_PORT_STATUS: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1346);
const BRAIN_SENSOR_STATUS: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1356);
const BRAIN_AI_VISION: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1366);

/// The BLE GATT service of the classroom robots (123, GO, Coder)
pub const ROBOT_SERVICE: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1f00);

const ROBOT_ADMIN_TX: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1f01);
const ROBOT_ADMIN_RX: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1f02);
const ROBOT_USER_TX: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1f03);
const ROBOT_USER_RX: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1f04);
const ROBOT_PORT_STATUS: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1f05);
const ROBOT_SENSOR_STATUS: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1f06);

/// The TI image-update service used by the robots' radio SoC
pub const TI_OAD_SERVICE: Uuid = Uuid::from_u128(0xf000ffc0_0451_4000_b000_000000000000);

const TI_OAD_IDENTIFY: Uuid = Uuid::from_u128(0xf000ffc1_0451_4000_b000_000000000000);
const TI_OAD_BLOCK: Uuid = Uuid::from_u128(0xf000ffc2_0451_4000_b000_000000000000);
const TI_OAD_CONTROL: Uuid = Uuid::from_u128(0xf000ffc5_0451_4000_b000_000000000000);

/// The VEX image-update service used by newer radio firmware
pub const VEX_OAD_SERVICE: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1e00);

const VEX_OAD_IDENTIFY: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1e01);
const VEX_OAD_BLOCK: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1e02);
const VEX_OAD_CONTROL: Uuid = Uuid::from_u128(0x08590f7e_db05_467e_8757_72f6faeb1e05);

/// Which firmware download protocol a product speaks
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OadTarget {
    /// Implicit block size negotiation, blocks requested by number
    Ti,
    /// Explicit request/reply negotiation with a CRC8 protected identify blob
    Vex,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProductType {
    Vex123,
    Go,
    Coder,
    Aim,
    Iq2,
    Exp,
    OneStick,
}

/// What a product can do and where to find it
#[derive(Debug)]
pub struct ProductCapabilities {
    pub name: &'static str,
    pub service: Uuid,
    /// Characteristics of the main service
    pub characteristics: &'static [(CharacteristicId, Uuid)],
    /// Characteristics that carry unsolicited status notifications
    pub status: &'static [CharacteristicId],
    /// CDC2 extended commands, and with them the file system
    pub cdc2: bool,
    /// Legacy program start/stop commands
    pub legacy: bool,
    /// Whether the lock characteristic must read 0xDEADFACE before commands are accepted
    pub lock_code: bool,
    pub oad: Option<OadTarget>,
}

const BRAIN_CHARACTERISTICS: &[(CharacteristicId, Uuid)] = &[
    (CharacteristicId::AdminTx, BRAIN_ADMIN_TX),
    (CharacteristicId::AdminRx, BRAIN_ADMIN_RX),
    (CharacteristicId::UserTx, BRAIN_USER_TX),
    (CharacteristicId::UserRx, BRAIN_USER_RX),
    (CharacteristicId::Lock, BRAIN_LOCK),
];

const AIM_CHARACTERISTICS: &[(CharacteristicId, Uuid)] = &[
    (CharacteristicId::AdminTx, BRAIN_ADMIN_TX),
    (CharacteristicId::AdminRx, BRAIN_ADMIN_RX),
    (CharacteristicId::UserTx, BRAIN_USER_TX),
    (CharacteristicId::UserRx, BRAIN_USER_RX),
    (CharacteristicId::Lock, BRAIN_LOCK),
    (CharacteristicId::PortStatus, BRAIN_PORT_STATUS),
    (CharacteristicId::SensorStatus, BRAIN_SENSOR_STATUS),
    (CharacteristicId::AiVision, BRAIN_AI_VISION),
];

const ROBOT_CHARACTERISTICS: &[(CharacteristicId, Uuid)] = &[
    (CharacteristicId::AdminTx, ROBOT_ADMIN_TX),
    (CharacteristicId::AdminRx, ROBOT_ADMIN_RX),
    (CharacteristicId::UserTx, ROBOT_USER_TX),
    (CharacteristicId::UserRx, ROBOT_USER_RX),
    (CharacteristicId::PortStatus, ROBOT_PORT_STATUS),
    (CharacteristicId::SensorStatus, ROBOT_SENSOR_STATUS),
];

const CODER_CHARACTERISTICS: &[(CharacteristicId, Uuid)] = &[
    (CharacteristicId::AdminTx, ROBOT_ADMIN_TX),
    (CharacteristicId::AdminRx, ROBOT_ADMIN_RX),
];

const TI_OAD_CHARACTERISTICS: &[(CharacteristicId, Uuid)] = &[
    (CharacteristicId::OadIdentify, TI_OAD_IDENTIFY),
    (CharacteristicId::OadBlock, TI_OAD_BLOCK),
    (CharacteristicId::OadControl, TI_OAD_CONTROL),
];

const VEX_OAD_CHARACTERISTICS: &[(CharacteristicId, Uuid)] = &[
    (CharacteristicId::OadIdentify, VEX_OAD_IDENTIFY),
    (CharacteristicId::OadBlock, VEX_OAD_BLOCK),
    (CharacteristicId::OadControl, VEX_OAD_CONTROL),
];

static VEX_123: ProductCapabilities = ProductCapabilities {
    name: "VEX 123",
    service: ROBOT_SERVICE,
    characteristics: ROBOT_CHARACTERISTICS,
    status: &[
        CharacteristicId::PortStatus,
        CharacteristicId::SensorStatus,
        CharacteristicId::UserRx,
    ],
    cdc2: false,
    legacy: true,
    lock_code: false,
    oad: Some(OadTarget::Ti),
};

static GO: ProductCapabilities = ProductCapabilities {
    name: "VEX GO",
    service: ROBOT_SERVICE,
    characteristics: ROBOT_CHARACTERISTICS,
    status: &[
        CharacteristicId::PortStatus,
        CharacteristicId::SensorStatus,
        CharacteristicId::UserRx,
    ],
    cdc2: true,
    legacy: false,
    lock_code: false,
    oad: Some(OadTarget::Ti),
};

static CODER: ProductCapabilities = ProductCapabilities {
    name: "VEX Coder",
    service: ROBOT_SERVICE,
    characteristics: CODER_CHARACTERISTICS,
    status: &[],
    cdc2: false,
    legacy: true,
    lock_code: false,
    oad: Some(OadTarget::Ti),
};

static AIM: ProductCapabilities = ProductCapabilities {
    name: "VEX AIM",
    service: BRAIN_SERVICE,
    characteristics: AIM_CHARACTERISTICS,
    status: &[
        CharacteristicId::PortStatus,
        CharacteristicId::SensorStatus,
        CharacteristicId::AiVision,
        CharacteristicId::UserRx,
    ],
    cdc2: true,
    legacy: false,
    lock_code: true,
    oad: Some(OadTarget::Vex),
};

static IQ2: ProductCapabilities = ProductCapabilities {
    name: "VEX IQ (2nd gen)",
    service: BRAIN_SERVICE,
    characteristics: BRAIN_CHARACTERISTICS,
    status: &[CharacteristicId::UserRx],
    cdc2: true,
    legacy: true,
    lock_code: true,
    oad: None,
};

static EXP: ProductCapabilities = ProductCapabilities {
    name: "VEX EXP",
    service: BRAIN_SERVICE,
    characteristics: BRAIN_CHARACTERISTICS,
    status: &[CharacteristicId::UserRx],
    cdc2: true,
    legacy: true,
    lock_code: true,
    oad: None,
};

static ONE_STICK: ProductCapabilities = ProductCapabilities {
    name: "VEX AIM OneStick",
    service: BRAIN_SERVICE,
    characteristics: BRAIN_CHARACTERISTICS,
    status: &[CharacteristicId::UserRx],
    cdc2: true,
    legacy: false,
    lock_code: false,
    oad: Some(OadTarget::Vex),
};

impl ProductType {
    pub const ALL: [ProductType; 7] = [
        ProductType::Vex123,
        ProductType::Go,
        ProductType::Coder,
        ProductType::Aim,
        ProductType::Iq2,
        ProductType::Exp,
        ProductType::OneStick,
    ];

    pub fn capabilities(self) -> &'static ProductCapabilities {
        match self {
            ProductType::Vex123 => &VEX_123,
            ProductType::Go => &GO,
            ProductType::Coder => &CODER,
            ProductType::Aim => &AIM,
            ProductType::Iq2 => &IQ2,
            ProductType::Exp => &EXP,
            ProductType::OneStick => &ONE_STICK,
        }
    }

    /// Parses the short names accepted on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "123" => Some(ProductType::Vex123),
            "go" => Some(ProductType::Go),
            "coder" => Some(ProductType::Coder),
            "aim" => Some(ProductType::Aim),
            "iq2" | "iq" => Some(ProductType::Iq2),
            "exp" => Some(ProductType::Exp),
            "onestick" => Some(ProductType::OneStick),
            _ => None,
        }
    }
}

impl OadTarget {
    pub fn service(self) -> Uuid {
        match self {
            OadTarget::Ti => TI_OAD_SERVICE,
            OadTarget::Vex => VEX_OAD_SERVICE,
        }
    }

    pub fn characteristics(self) -> &'static [(CharacteristicId, Uuid)] {
        match self {
            OadTarget::Ti => TI_OAD_CHARACTERISTICS,
            OadTarget::Vex => VEX_OAD_CHARACTERISTICS,
        }
    }
}

impl ProductCapabilities {
    pub fn uuid_of(&self, id: CharacteristicId) -> Option<Uuid> {
        self.characteristics
            .iter()
            .chain(self.oad.map(OadTarget::characteristics).unwrap_or(&[]))
            .find(|(c, _)| *c == id)
            .map(|(_, uuid)| *uuid)
    }

    pub fn has(&self, id: CharacteristicId) -> bool {
        self.uuid_of(id).is_some()
    }
}
