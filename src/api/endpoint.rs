pub type Endpoint = str;

pub const LOGIN: &Endpoint = "/openapi/login";
pub const PLANTS: &Endpoint = "/openapi/getPowerStationList";
pub const PLANT_DETAIL: &Endpoint = "/openapi/getPowerStationDetail";
pub const DEVICES: &Endpoint = "/openapi/getDeviceList";
pub const DEVICE_REAL_TIME: &Endpoint = "/openapi/getDeviceRealTimeData";
pub const OAUTH_TOKEN: &Endpoint = "/openapi/apiManage/token";
pub const OAUTH_REFRESH: &Endpoint = "/openapi/apiManage/refreshToken";
