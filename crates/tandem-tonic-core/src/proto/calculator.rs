//! `calculator.CalculatorService`.

use crate::server::ServiceName;

pub struct CalculatorService;

impl ServiceName for CalculatorService {
    const NAME: &'static str = "calculator.CalculatorService";
}

/// Unary: adds two numbers.
pub const SUM: &str = "/calculator.CalculatorService/Sum";
/// Server-streaming: one response per prime factor.
pub const PRIME_NUMBER_DECOMPOSITION: &str =
    "/calculator.CalculatorService/PrimeNumberDecomposition";
/// Client-streaming: mean of every number sent.
pub const COMPUTE_AVERAGE: &str = "/calculator.CalculatorService/ComputeAverage";
/// Bidirectional: emits each new running maximum.
pub const FIND_MAXIMUM: &str = "/calculator.CalculatorService/FindMaximum";
/// Unary: square root, rejecting negative input.
pub const SQUARE_ROOT: &str = "/calculator.CalculatorService/SquareRoot";

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SumRequest {
    #[prost(int32, tag = "1")]
    pub first_number: i32,
    #[prost(int32, tag = "2")]
    pub second_number: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SumResponse {
    #[prost(int32, tag = "1")]
    pub sum_result: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PrimeNumberDecompositionRequest {
    #[prost(int64, tag = "1")]
    pub number: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PrimeNumberDecompositionResponse {
    #[prost(int64, tag = "1")]
    pub prime_factor: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ComputeAverageRequest {
    #[prost(int32, tag = "1")]
    pub number: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ComputeAverageResponse {
    #[prost(double, tag = "1")]
    pub average: f64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct FindMaximumRequest {
    #[prost(int32, tag = "1")]
    pub number: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct FindMaximumResponse {
    #[prost(int32, tag = "1")]
    pub maximum: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SquareRootRequest {
    #[prost(int32, tag = "1")]
    pub number: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SquareRootResponse {
    #[prost(double, tag = "1")]
    pub number_root: f64,
}
