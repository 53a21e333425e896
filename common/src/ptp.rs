//! PTP-level code tables shared by the transport engine and its callers.
//!
//! Only the codes the client itself issues or inspects are listed; devices
//! are free to send others, so the aliases stay plain integers rather than
//! closed enums.

pub type TransactionId = u32;
pub type OperationCode = u16;
pub type ResponseCode = u16;
pub type EventCode = u16;
pub type DevicePropCode = u16;
pub type VendorExtension = u16;

pub const VE_GENERIC: VendorExtension = 0x0000;
pub const VE_FUJI_PHOTO_FILM: VendorExtension = 0x000E;

pub const OC_GET_DEVICE_INFO: OperationCode = 0x1001;
pub const OC_OPEN_SESSION: OperationCode = 0x1002;
pub const OC_CLOSE_SESSION: OperationCode = 0x1003;
pub const OC_GET_STORAGE_IDS: OperationCode = 0x1004;
pub const OC_GET_OBJECT_INFO: OperationCode = 0x1008;
pub const OC_GET_OBJECT: OperationCode = 0x1009;
pub const OC_INITIATE_CAPTURE: OperationCode = 0x100E;
pub const OC_GET_DEVICE_PROP_DESC: OperationCode = 0x1014;
pub const OC_GET_DEVICE_PROP_VALUE: OperationCode = 0x1015;
pub const OC_SET_DEVICE_PROP_VALUE: OperationCode = 0x1016;
pub const OC_TERMINATE_OPEN_CAPTURE: OperationCode = 0x1018;
pub const OC_INITIATE_OPEN_CAPTURE: OperationCode = 0x101C;

pub const RC_OK: ResponseCode = 0x2001;
pub const RC_GENERAL_ERROR: ResponseCode = 0x2002;
pub const RC_SESSION_NOT_OPEN: ResponseCode = 0x2003;
pub const RC_INVALID_TRANSACTION_ID: ResponseCode = 0x2004;
pub const RC_OPERATION_NOT_SUPPORTED: ResponseCode = 0x2005;
pub const RC_PARAMETER_NOT_SUPPORTED: ResponseCode = 0x2006;
pub const RC_INCOMPLETE_TRANSFER: ResponseCode = 0x2007;
pub const RC_DEVICE_BUSY: ResponseCode = 0x2019;
pub const RC_INVALID_PARENT_OBJECT: ResponseCode = 0x201A;
pub const RC_INVALID_PARAMETER: ResponseCode = 0x201D;
pub const RC_SESSION_ALREADY_OPEN: ResponseCode = 0x201E;
pub const RC_TRANSACTION_CANCELLED: ResponseCode = 0x201F;

pub const EC_CANCEL_TRANSACTION: EventCode = 0x4001;
pub const EC_OBJECT_ADDED: EventCode = 0x4002;
pub const EC_OBJECT_REMOVED: EventCode = 0x4003;
pub const EC_DEVICE_PROP_CHANGED: EventCode = 0x4006;
pub const EC_STORE_FULL: EventCode = 0x400A;
pub const EC_CAPTURE_COMPLETE: EventCode = 0x400D;
