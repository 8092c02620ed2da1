/// Implements `RequestTrait` for a request model by delegating to its base
/// request field.
///
/// # Usage
/// ```ignore
/// impl_request_trait!(ConfigQueryRequest, config_request.request, "ConfigQueryRequest");
/// ```
macro_rules! impl_request_trait {
    ($ty:ty, $($base:ident).+, $type_name:expr) => {
        impl $crate::remote::RequestTrait for $ty {
            fn headers(&self) -> std::collections::HashMap<String, String> {
                self.$($base).+.headers.clone()
            }

            fn request_type(&self) -> &'static str {
                $type_name
            }

            fn insert_headers(&mut self, headers: std::collections::HashMap<String, String>) {
                self.$($base).+.headers.extend(headers);
            }

            fn request_id(&self) -> String {
                self.$($base).+.request_id.clone()
            }

            fn set_request_id(&mut self, request_id: String) {
                self.$($base).+.request_id = request_id;
            }
        }
    };
}

/// Implements `ResponseTrait` for a response model with a flattened
/// `response: Response` field.
macro_rules! impl_response_trait {
    ($ty:ty, $type_name:expr) => {
        impl $crate::remote::ResponseTrait for $ty {
            fn response_type(&self) -> &'static str {
                $type_name
            }

            fn set_request_id(&mut self, request_id: String) {
                self.response.request_id = request_id;
            }

            fn error_code(&self) -> i32 {
                self.response.error_code
            }

            fn result_code(&self) -> i32 {
                self.response.result_code
            }

            fn message(&self) -> String {
                self.response.message.clone()
            }
        }
    };
}
