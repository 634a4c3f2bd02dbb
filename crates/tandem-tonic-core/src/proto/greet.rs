//! `greet.GreetService`.
//!
//! Every request carries a [`Greeting`]; a request without one is rejected
//! with `invalid-argument`.

use crate::server::ServiceName;

pub struct GreetService;

impl ServiceName for GreetService {
    const NAME: &'static str = "greet.GreetService";
}

pub const GREET: &str = "/greet.GreetService/Greet";
pub const GREET_MANY_TIMES: &str = "/greet.GreetService/GreetManyTimes";
pub const LONG_GREET: &str = "/greet.GreetService/LongGreet";
pub const GREET_EVERYONE: &str = "/greet.GreetService/GreetEveryone";
pub const GREET_WITH_DEADLINE: &str = "/greet.GreetService/GreetWithDeadline";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Greeting {
    #[prost(string, tag = "1")]
    pub first_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub last_name: ::prost::alloc::string::String,
}

impl Greeting {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

macro_rules! greeting_messages {
    ($($request:ident => $response:ident),+ $(,)?) => {
        $(
            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct $request {
                #[prost(message, optional, tag = "1")]
                pub greeting: ::core::option::Option<Greeting>,
            }

            impl From<Greeting> for $request {
                fn from(greeting: Greeting) -> Self {
                    Self {
                        greeting: Some(greeting),
                    }
                }
            }

            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct $response {
                #[prost(string, tag = "1")]
                pub result: ::prost::alloc::string::String,
            }
        )+
    };
}

greeting_messages! {
    GreetRequest => GreetResponse,
    GreetManyTimesRequest => GreetManyTimesResponse,
    LongGreetRequest => LongGreetResponse,
    GreetEveryoneRequest => GreetEveryoneResponse,
    GreetWithDeadlineRequest => GreetWithDeadlineResponse,
}
